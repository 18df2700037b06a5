// Simulate cars arriving and being served at a carwash
use rand::{rngs::SmallRng, SeedableRng};
use rand::distributions::{Distribution, Uniform};
use rand_distr::Exp;

use eventsim::prelude::*;

const NUM_MACHINES: usize = 4; // A carwash with 4 machines to wash cars
const NUM_CARS: usize = 100; // 100 cars generated
const SIM_TIME: f64 = 100.0; // New cars are spawned randomly for 100 minutes
const LAMBDA_DRIVE: f64 = 5.0; // Each car drives for ~5 minutes
const LAMBDA_WASH: f64 = 2.0; // It takes ~2 minutes to wash a car

fn main() {
    let env: Environment<()> = Environment::new();
    let carwash = Resource::new(&env, NUM_MACHINES);

    let mut rng = SmallRng::seed_from_u64(42);
    let arrivals = Uniform::new(0.0, SIM_TIME);
    let drive = Exp::new(1.0 / LAMBDA_DRIVE).unwrap();
    let wash = Exp::new(1.0 / LAMBDA_WASH).unwrap();

    for car in 0..NUM_CARS {
        let t_arrive: f64 = arrivals.sample(&mut rng);
        let t_drive: f64 = drive.sample(&mut rng);
        let t_wash: f64 = wash.sample(&mut rng);
        let carwash = carwash.clone();
        env.process(move |ctx| {
            Box::pin(async move {
                ctx.wait(&ctx.timeout(t_arrive + t_drive)).await?;
                println!("{:.2}\tcar {car} arrives at the carwash", ctx.now());
                let machine = carwash.request();
                ctx.wait(&machine).await?;
                println!("{:.2}\tcar {car} enters a machine", ctx.now());
                ctx.wait(&ctx.timeout(t_wash)).await?;
                carwash.release(&machine);
                println!("{:.2}\tcar {car} leaves clean", ctx.now());
                Ok(EventValue::Unit)
            })
        });
    }

    env.run(EndCondition::NoEvents).unwrap();
    println!("all cars washed by {:.2}", env.now());
}
