use hds_core::FaultIndex;

pub fn run(output_dir: &str, json: bool) {
    let index = FaultIndex::in_dir(output_dir);
    let entries = match index.load() {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&entries) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Failed to encode index: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    if entries.is_empty() {
        println!("No packages in {}", index.path().display());
        return;
    }

    println!(
        "{:<20} {:<10} {:<20} File",
        "Timestamp (UTC)", "Fault", "App"
    );
    println!("{}", "-".repeat(90));
    for e in &entries {
        println!(
            "{:<20} {:<10} {:<20} {}",
            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            e.fault,
            e.app,
            e.file
        );
    }
    println!();
    println!("{} package(s) in {}", entries.len(), index.path().display());
}
