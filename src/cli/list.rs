use table::{IntoTable, Table};
mod table;

use crate::cli::orchestrator_or_die;
use crate::config::Config;
use crate::display::DisplayModel;
use crate::orchestrator::EXIT_SUCCESS;
use crate::utils::errors::DEFAULT_EXIT_CODE;
use crate::registry::Registry;
use crate::{error, warn, ListArgs, ListingFormat};

fn yes_no(flag: bool) -> String {
    let word = if flag { "yes" } else { "no" };

    word.to_string()
}

#[derive(serde::Serialize)]
struct RegistryRow {
    name: String,
    model: String,
    api_base: Option<String>,
    default: bool,
}

#[derive(serde::Serialize)]
#[serde(transparent)]
struct RegistryRows(Vec<RegistryRow>);

impl From<&Registry> for RegistryRows {
    fn from(registry: &Registry) -> Self {
        let rows = registry
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| RegistryRow {
                name: entry.name.clone(),
                model: entry.backend.to_string(),
                api_base: entry.endpoint_override.clone(),
                default: i == 0,
            })
            .collect();

        RegistryRows(rows)
    }
}

impl From<RegistryRows> for Table {
    fn from(value: RegistryRows) -> Self {
        let mut tab = Table::new(&["NAME", "MODEL", "API_BASE", "DEFAULT"]);

        for row in value.0 {
            tab.add_row(vec![
                row.name,
                row.model,
                row.api_base.unwrap_or_else(|| "-".to_string()),
                yes_no(row.default),
            ]);
        }

        tab
    }
}

impl From<Vec<DisplayModel>> for Table {
    fn from(value: Vec<DisplayModel>) -> Self {
        let mut tab = Table::new(&["NAME", "TYPE", "SIZE", "MODIFIED", "CONFIGURED", "ACTIVE"]);

        for model in value {
            let size = model.size_label();

            tab.add_row(vec![
                model.name,
                model.kind,
                size,
                model.modified.unwrap_or_else(|| "-".to_string()),
                yes_no(model.configured),
                yes_no(model.active),
            ]);
        }

        tab
    }
}

fn format_output<O: IntoTable + serde::Serialize>(object: O, format: ListingFormat) -> i32 {
    match format {
        ListingFormat::Json => match serde_json::to_string_pretty(&object) {
            Ok(output) => println!("{}", output),
            Err(err) => {
                error!("failed to serialize listing: {}", err);
                return DEFAULT_EXIT_CODE;
            }
        },
        ListingFormat::Table => {
            let tab = object.into_table();

            print!("{}", tab);
        }
        ListingFormat::HeaderlessTable => {
            let mut tab = object.into_table();

            tab.print_header(false);

            print!("{}", tab);
        }
    }

    EXIT_SUCCESS
}

/// Prints the registry entries in order.
pub(crate) async fn registry_cmd(config: &Config, args: &ListArgs) -> i32 {
    let orchestrator = orchestrator_or_die(config);

    match orchestrator.get_registry() {
        Ok(registry) => format_output(RegistryRows::from(&registry), args.format),
        Err(err) => {
            error!("{}", err);
            err.exit_code()
        }
    }
}

/// Prints installed and configured models together.
pub(crate) async fn list_cmd(config: &Config, args: &ListArgs) -> i32 {
    let orchestrator = orchestrator_or_die(config);

    let listing = match orchestrator.list_display_models().await {
        Ok(listing) => listing,
        Err(err) => {
            error!("{}", err);
            return err.exit_code();
        }
    };

    if let Some(err) = &listing.installed_error {
        warn!("{}, showing configured models only", err);
    }

    format_output(listing.models, args.format)
}
