use crate::cli::DiscoverArgs;
use crate::exit_codes;
use crate::output;
use sigcap::{create_transport, discover, CaptureError};
use std::time::Duration;

pub async fn execute(args: DiscoverArgs) -> i32 {
    if !(args.timeout.is_finite() && args.timeout > 0.0) {
        eprintln!("Error: --timeout must be a positive number of seconds");
        return exit_codes::INPUT_ERROR;
    }

    let transport_config = match args.transport.to_config() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };
    let transport = match create_transport(transport_config) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    let kinds = args.kinds();
    let timeout = Duration::from_secs_f64(args.timeout);
    let result = tokio::task::spawn_blocking(move || discover(transport, &kinds, timeout)).await;

    let report = match result {
        Ok(Ok(report)) => report,
        Ok(Err(CaptureError::NoSources(types))) => {
            eprintln!("No streams found for: {}", types);
            return exit_codes::NO_SOURCES;
        }
        Ok(Err(e)) => {
            eprintln!("Discovery failed: {}", e);
            return exit_codes::for_error(&e);
        }
        Err(e) => {
            eprintln!("Discovery task failed: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    if args.json {
        return output::emit_json(&report, false);
    }

    println!("Found {} stream(s):\n", report.resolved.len());
    println!(
        "  {:<6} {:<20} {:>8} {:>10} {:<8} {:<20}",
        "Type", "Name", "Channels", "Rate (Hz)", "Format", "Source"
    );
    println!("  {}", "-".repeat(78));
    for info in &report.resolved {
        println!(
            "  {:<6} {:<20} {:>8} {:>10.2} {:<8} {:<20}",
            info.kind.as_str(),
            info.name,
            info.channel_count,
            info.nominal_rate,
            format!("{:?}", info.sample_format),
            info.source_id
        );
    }
    if !report.missing.is_empty() {
        let missing: Vec<&str> = report.missing.iter().map(|k| k.as_str()).collect();
        println!("\nNot found: {}", missing.join(", "));
    }

    exit_codes::SUCCESS
}
