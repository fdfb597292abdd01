// Laser bring-up and a scheduled experiment
//
// Brings the laser to an emitting state, then runs a short scheduled
// experiment against it. Requires the `hardware` feature and the vendor
// libraries on the linker search path.

use clap::Parser;
use sidekick_rs::{Action, Experiment, QclDriver, QclParameterSet, SidekickSdk};

#[derive(Parser)]
struct Args {
    /// QCL drive current in mA
    #[arg(long, default_value_t = 1500)]
    current_ma: u16,

    /// Experiment duration in seconds
    #[arg(long, default_value_t = 60)]
    duration: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    println!("SideKick Bring-Up Example");
    println!("=========================\n");

    let sdk = SidekickSdk::open()?;
    let mut driver = QclDriver::new(sdk);
    let params = QclParameterSet {
        current_ma: args.current_ma,
        ..QclParameterSet::default()
    };

    println!("1. Bringing the laser up...");
    driver.bring_up(params)?;
    println!("   Laser is emitting\n");

    println!("2. Running a {}s experiment...", args.duration);
    let experiment = Experiment::builder()
        // Widen the pulse at the 30 second mark.
        .action(Action::pulse_width(|t| (t == 30).then_some(1000.0)))
        .duration_secs(args.duration)
        .build()?;
    let completed = experiment.run(&mut driver)?;
    println!("   Experiment completed: {completed}");

    Ok(())
}
