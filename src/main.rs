use std::path::PathBuf;

use clap::Parser;

use rust_demand_assignment::{AssignmentConfig, AssignmentError, FareTable};


/// Checks that an assignment config and a fare table can be used together.
#[derive(Parser, Debug)]
#[command(version, about)]
struct ValidateArgs {
    /// YAML assignment config
    #[arg(short, long)]
    config: PathBuf,
    /// tab-separated fare zone table
    #[arg(short, long)]
    fares: PathBuf,
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn validate(args: &ValidateArgs) -> Result<(), AssignmentError> {
    let cfg = AssignmentConfig::from_file(&args.config)?;
    log::info!("Read config {:?}: scenarios {}-{}, {} municipalities", args.config,
               cfg.bike_scenario(), cfg.first_scenario_id + 4, cfg.municipalities.len());

    let fares = FareTable::from_csv(&args.fares)?;
    fares.check_municipalities(&cfg.municipalities)?;
    let peripheral = &cfg.peripheral_zones;
    for (name, range) in &cfg.municipalities {
        if range.first <= peripheral.last && peripheral.first <= range.last {
            return Err(AssignmentError::Config(
                format!("municipality {} overlaps the peripheral zones", name)));
        }
    }
    log::info!("Read {} fare zone combinations over zones {}, start fare {}, distance fare {}",
               fares.fares().len(),
               fares.zone_labels().into_iter().collect::<Vec<String>>().join(""),
               fares.start_fare(), fares.dist_fare());
    return Ok(());
}

fn main() {
    let args = ValidateArgs::parse();
    env_logger::Builder::new().parse_filters(&args.log_level).init();
    match validate(&args) {
        Ok(_) => log::info!("Input files are valid"),
        Err(ee) => {
            log::error!("{}", ee);
            eprintln!("{}", ee);
            std::process::exit(1);
        }
    }
}
