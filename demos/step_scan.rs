// Step scan with lock-in acquisition
//
// Brings the laser up, configures the lock-in channel and runs a step
// scan, printing each captured batch as a DataFrame. Requires the
// `hardware` feature and the vendor libraries on the linker search path.

use clap::Parser;
use sidekick_rs::{
    LockinChannel, LockinConfig, QclDriver, QclParameterSet, ScanConfig, SidekickSdk,
    StepScanner, ZiApi,
};

#[derive(Parser)]
struct Args {
    /// Number of scan steps to run
    #[arg(long, default_value_t = 1)]
    steps: usize,

    /// Lock-in data server address
    #[arg(long, default_value = "192.168.48.102")]
    lockin_host: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    println!("SideKick Step Scan Example");
    println!("==========================\n");

    println!("1. Bringing the laser up...");
    let sdk = SidekickSdk::open()?;
    let mut driver = QclDriver::new(sdk);
    driver.bring_up(QclParameterSet::default())?;

    println!("2. Connecting to the lock-in amplifier...");
    let config = LockinConfig {
        host: args.lockin_host,
        ..LockinConfig::default()
    };
    let api = ZiApi::connect(&config.host, config.port)?;
    let lockin = LockinChannel::connect(api, config)?;
    lockin.initialize()?;
    println!("   Lock-in device: {}\n", lockin.device());

    println!("3. Running {} scan step(s)...", args.steps);
    let outcome = StepScanner::new(&mut driver, &lockin, ScanConfig::default()).run(args.steps)?;
    println!("   Scan started at {:.3} (unix seconds)\n", outcome.started_at);

    for (step, batch) in outcome.batches.into_iter().enumerate() {
        println!("Step {}: {} samples", step, batch.len());
        if !batch.is_empty() {
            println!("{}", batch.into_dataframe()?);
        }
    }
    for (step, temp) in outcome.telemetry.controller_temp_c.iter().enumerate() {
        println!("Step {} controller temperature: {temp:.1} C", step);
    }

    driver.turn_off();
    Ok(())
}
