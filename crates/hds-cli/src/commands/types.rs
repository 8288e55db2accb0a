use hds_core::{FAULT_TYPES, UNKNOWN_TYPE};

pub fn run() {
    println!("{:<6} Meaning", "Code");
    println!("{}", "-".repeat(48));
    for (code, meaning) in FAULT_TYPES {
        println!("{code:<6} {meaning}");
    }
    println!();
    println!("Any other code is reported as \"{UNKNOWN_TYPE}\".");
}
