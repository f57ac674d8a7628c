use anyhow::{Context, Result};
use arrow::datatypes::DataType;
use arrow::ipc::reader::FileReaderBuilder;
use std::fs::File;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        println!("Usage: {} <feather_file>", args[0]);
        std::process::exit(1);
    }

    let file = File::open(&args[1]).with_context(|| format!("Failed to open {}", args[1]))?;
    let reader = FileReaderBuilder::new().build(file)?;
    let schema = reader.schema();

    println!("\nSchema:");
    println!("{:#?}", schema);

    // the frame loader needs ts as strings and both channels as numeric lists
    println!("\nFrame columns:");
    for name in ["ts", "red", "ir"] {
        let status = match schema.field_with_name(name) {
            Ok(field) => match field.data_type() {
                DataType::Utf8 if name == "ts" => "ok".to_string(),
                DataType::List(item) if name != "ts" => match item.data_type() {
                    DataType::Float32 | DataType::Int32 => "ok".to_string(),
                    other => format!("unsupported list item {}", other),
                },
                other => format!("unsupported type {}", other),
            },
            Err(_) => "missing".to_string(),
        };
        println!("  {:<4} {}", name, status);
    }

    let rows: usize = reader
        .map(|batch| batch.map(|b| b.num_rows()))
        .sum::<std::result::Result<usize, _>>()?;
    println!("\nRows: {}", rows);

    Ok(())
}
