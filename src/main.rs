use log::{error, LevelFilter};

use padproxy::scheduler::Scheduler;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    println!("padproxy - controller input proxy");
    println!("=================================");

    padproxy::logging::install(LevelFilter::Info);

    let mut scheduler = match Scheduler::bootstrap() {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("initialization failed: {e}");
            return -1;
        }
    };

    if scheduler.is_test_mode() {
        println!("virtual bus unavailable; running in input test mode");
    } else {
        println!("proxy service started");
    }

    scheduler.run()
}
