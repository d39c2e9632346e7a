use comfy_table::{presets::UTF8_FULL, Table};

use tlmframe_packet::load_registry;

use crate::cmd::DefsArgs;
use crate::exit::{registry_error, CliResult, SUCCESS};

pub fn run(args: DefsArgs) -> CliResult<i32> {
    let index = load_registry(&args.registry)
        .map_err(|err| registry_error("loading registry", err))?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Target", "Packet", "Length", "Items", "Id Fields"]);

    for definition in index.definitions() {
        let id_fields: Vec<String> = definition
            .id_items()
            .iter()
            .map(|item| {
                let value = item
                    .id_value
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                format!("{}={}", item.name, value)
            })
            .collect();
        table.add_row(vec![
            definition.target_name.clone(),
            definition.packet_name.clone(),
            definition.defined_length.to_string(),
            definition.items.len().to_string(),
            if id_fields.is_empty() {
                "CATCHALL".to_string()
            } else {
                id_fields.join(", ")
            },
        ]);
    }

    println!("{table}");
    Ok(SUCCESS)
}
