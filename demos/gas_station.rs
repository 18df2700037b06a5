// A gas station with a shared fuel tank: cars occupy one of two pumps
// and draw fuel from the tank, while a monitor orders a tank truck
// whenever the reserve runs low.
use rand::{rngs::SmallRng, SeedableRng};
use rand::distributions::{Distribution, Uniform};

use eventsim::prelude::*;

const STATION_TANK: f64 = 200.0; // liters held by the station
const THRESHOLD: f64 = 25.0; // percent of tank level triggering the truck
const CAR_TANK_SIZE: f64 = 50.0; // liters in a car's tank
const REFUEL_SPEED: f64 = 2.0; // liters per minute
const TANK_TRUCK_TIME: f64 = 10.0; // minutes for the truck to arrive
const CHECK_EVERY: f64 = 10.0; // monitor period
const NUM_CARS: usize = 25;
const SIM_TIME: f64 = 300.0;

fn main() {
    let env: Environment<()> = Environment::new();
    let pumps = Resource::new(&env, 2);
    let fuel = Container::new(&env, STATION_TANK, STATION_TANK);
    let mut rng = SmallRng::seed_from_u64(7);

    {
        let fuel = fuel.clone();
        env.process(move |ctx| {
            Box::pin(async move {
                loop {
                    if fuel.level() / STATION_TANK * 100.0 < THRESHOLD {
                        println!("{:.1}\tcalling the tank truck", ctx.now());
                        ctx.wait(&ctx.timeout(TANK_TRUCK_TIME)).await?;
                        let amount = STATION_TANK - fuel.level();
                        ctx.wait(&fuel.put(amount)).await?;
                        println!("{:.1}\ttruck delivered {amount:.1} liters", ctx.now());
                    }
                    ctx.wait(&ctx.timeout(CHECK_EVERY)).await?;
                }
            })
        });
    }

    let gaps = Uniform::new(5.0, 15.0);
    let levels = Uniform::new(5.0, 25.0);
    let mut arrives = 0.0;
    for car in 0..NUM_CARS {
        arrives += gaps.sample(&mut rng);
        let missing = CAR_TANK_SIZE - levels.sample(&mut rng);
        let pumps = pumps.clone();
        let fuel = fuel.clone();
        env.process(move |ctx| {
            Box::pin(async move {
                ctx.wait(&ctx.timeout(arrives)).await?;
                println!("{:.1}\tcar {car} arriving at the gas station", ctx.now());
                let pump = pumps.request();
                ctx.wait(&pump).await?;
                ctx.wait(&fuel.get(missing)).await?;
                ctx.wait(&ctx.timeout(missing / REFUEL_SPEED)).await?;
                pumps.release(&pump);
                println!("{:.1}\tcar {car} refueled {missing:.1} liters", ctx.now());
                Ok(EventValue::Unit)
            })
        });
    }

    env.run(EndCondition::Time(SIM_TIME)).unwrap();
    println!("station closes at {:.1}", env.now());
}
