use super::{connect, load_config, start_session};
use crate::cli::SettingsArgs;
use crate::exit_codes;
use crate::output;
use pshr_monitor::{StreamConfiguration, StreamSettings};
use serde::Serialize;

#[derive(Serialize)]
struct SettingsOutput<'a> {
    device: String,
    settings: &'a StreamSettings,
    default_configuration: StreamConfiguration,
}

fn print_text(device: &str, settings: &StreamSettings) {
    println!("{} stream settings on {}", settings.kind, device);
    if settings.options.is_empty() {
        println!("  (no tunable parameters)");
        return;
    }
    for option in &settings.options {
        let values: Vec<String> = option
            .sorted_values()
            .iter()
            .map(|v| v.to_string())
            .collect();
        println!("  {}: {}", option.setting, values.join(", "));
    }
    let defaults: Vec<String> = settings
        .default_configuration()
        .selections
        .iter()
        .map(|(setting, value)| format!("{}={}", setting, value))
        .collect();
    println!("Default: {}", defaults.join(", "));
}

pub async fn execute(args: SettingsArgs) -> i32 {
    let config = match load_config(&args.connect, None) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };

    let mut session = start_session(config.clone(), &args.sim, false);
    let device = match connect(&mut session, &args.connect, &config).await {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Error: {}", e);
            session.handle.shutdown().await;
            return exit_codes::CONNECTION_ERROR;
        }
    };

    let exit_code = match session.handle.negotiate(args.kind).await {
        Ok(settings) => {
            if args.json {
                let out = SettingsOutput {
                    device: device.to_string(),
                    default_configuration: settings.default_configuration(),
                    settings: &settings,
                };
                match output::to_json(&out, false).and_then(|json| output::write_line(&json)) {
                    Ok(()) => exit_codes::SUCCESS,
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        exit_codes::EXECUTION_ERROR
                    }
                }
            } else {
                print_text(device.as_str(), &settings);
                exit_codes::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_codes::STREAM_ERROR
        }
    };

    session.handle.shutdown().await;
    exit_code
}
