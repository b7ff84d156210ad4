use crate::cli::RecordArgs;
use crate::exit_codes;
use crate::logging::LogFile;
use crate::output;
use chrono::Local;
use sigcap::{create_transport, SessionController, SessionSummary};

pub async fn execute(args: RecordArgs, log_file: LogFile) -> i32 {
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

    let controller = match SessionController::new(args.session_config(), transport) {
        Ok(controller) => controller
            .with_interrupt_handling(true)
            .with_hotkey(args.hotkey()),
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    if !args.no_log_file {
        let path = controller.session_dir().join("logs").join(format!(
            "collection_log_{}.log",
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        if let Err(e) = log_file.open(&path) {
            log::warn!("Cannot write log file {}: {}", path.display(), e);
        }
    }

    if !args.quiet {
        let types: Vec<&str> = args.types.iter().map(|k| k.as_str()).collect();
        eprintln!("Recording {} into {}", types.join(", "), controller.session_dir().display());
        match (args.duration, args.hotkey()) {
            (Some(secs), _) => eprintln!("  Duration: {:.1}s (Ctrl+C to stop early)", secs),
            (None, Some(key)) => eprintln!("  Type '{}' and Enter, or press Ctrl+C, to stop", key),
            (None, None) => eprintln!("  Press Ctrl+C to stop"),
        }
    }

    let summary = match controller.run().await {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Recording failed: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    if let Some(path) = &args.summary_out {
        let written = output::to_json(&summary, args.compact)
            .and_then(|json| output::write_output(&json, Some(path)));
        if let Err(e) = written {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    }

    if args.json {
        return output::emit_json(&summary, args.compact);
    }

    print_summary(&summary);
    exit_codes::SUCCESS
}

fn print_summary(summary: &SessionSummary) {
    println!("Session saved to {}", summary.session_dir.display());
    if let Some(reason) = summary.stop_reason {
        println!("Stopped: {} after {:.2}s", reason, summary.elapsed_secs);
    }
    println!();
    println!(
        "  {:<6} {:>10} {:>10} {:>8} {:>8}  {}",
        "Type", "Pulled", "Written", "Skipped", "Flushes", "File"
    );
    println!("  {}", "-".repeat(72));
    for stream in &summary.streams {
        println!(
            "  {:<6} {:>10} {:>10} {:>8} {:>8}  {}",
            stream.kind.as_str(),
            stream.samples_pulled,
            stream.rows_written,
            stream.samples_skipped,
            stream.flushes,
            stream.sink.display()
        );
    }
    if !summary.missing.is_empty() {
        let missing: Vec<&str> = summary.missing.iter().map(|k| k.as_str()).collect();
        println!("\nNot recorded: {}", missing.join(", "));
    }
}
