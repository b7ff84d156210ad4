use crate::cli::KindsArgs;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use sigcap::StreamKind;

#[derive(Serialize)]
struct KindInfo {
    kind: StreamKind,
    description: &'static str,
    sink_file: String,
}

pub fn execute(args: KindsArgs) -> i32 {
    let kinds: Vec<KindInfo> = StreamKind::ALL
        .iter()
        .map(|kind| KindInfo {
            kind: *kind,
            description: kind.description(),
            sink_file: format!("{}_signal.csv", kind.as_str()),
        })
        .collect();

    if args.json {
        return output::emit_json(&kinds, false);
    }

    println!("Supported stream types:\n");
    println!("  {:<6} {:<24} {:<16}", "Type", "Description", "File");
    println!("  {}", "-".repeat(48));
    for info in &kinds {
        println!(
            "  {:<6} {:<24} {:<16}",
            info.kind.as_str(),
            info.description,
            info.sink_file
        );
    }

    exit_codes::SUCCESS
}
