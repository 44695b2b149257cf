use anyhow::Context;
use colored::Colorize;
use proptable_store::{PropertyTable, TableConfig};
use proptable_types::{PropertyValue, SettingsGroup};
use tracing::{debug, info};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let table = open_table(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::List(args) => cmd_list(&table, args, format),
        Command::Get(args) => cmd_get(&table, args, format),
        Command::Set(args) => cmd_set(&table, args),
        Command::Remove(args) => cmd_remove(&table, args),
        Command::Migrate => cmd_migrate(&table, format),
    }
}

fn open_table(cli: &Cli) -> anyhow::Result<PropertyTable> {
    let mut config = match &cli.config {
        Some(path) => TableConfig::from_toml_file(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => TableConfig::default(),
    };
    if let Some(dir) = &cli.dir {
        config.user_settings_dir = dir.clone();
    }
    if let Some(id) = &cli.local {
        config.local_settings_id = id.clone();
    }

    debug!(dir = %config.user_settings_dir.display(), "opening settings");
    let table = PropertyTable::new(config)?;
    table.load_global()?;
    table.load_local()?;
    Ok(table)
}

fn cmd_list(table: &PropertyTable, args: ListArgs, format: OutputFormat) -> anyhow::Result<()> {
    let group = SettingsGroup::from(args.scope);
    let mut rows = Vec::new();
    for name in table.property_names(group)? {
        if let Some(info) = table.property_info(&name, group)? {
            rows.push((name, info));
        }
    }

    match format {
        OutputFormat::Json => {
            let out: Vec<_> = rows
                .iter()
                .map(|(name, info)| {
                    serde_json::json!({
                        "name": name,
                        "key": info.key,
                        "kind": info.kind,
                        "persist": info.persist,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No properties in {} scope.", group.to_string().bold());
            }
            for (name, info) in &rows {
                let kind = info.kind.map(|k| k.to_string()).unwrap_or_else(|| "empty".into());
                let persisted = if info.persist {
                    "persisted".green()
                } else {
                    "transient".dimmed()
                };
                println!("{:<32} {:<12} {}", name.bold(), kind.cyan(), persisted);
            }
        }
    }
    Ok(())
}

fn cmd_get(table: &PropertyTable, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let group = SettingsGroup::from(args.scope);
    let value = table.get_value(&args.name, group)?;
    match (value, format) {
        (None, _) => println!("{} {} is not set", "✗".red(), args.name.yellow()),
        (Some(value), OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        (Some(value), OutputFormat::Text) => {
            let tagged = serde_json::to_value(&value)?;
            let data = tagged.get("data").cloned().unwrap_or(serde_json::Value::Null);
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
    }
    Ok(())
}

fn cmd_set(table: &PropertyTable, args: SetArgs) -> anyhow::Result<()> {
    let group = SettingsGroup::from(args.scope);
    let value = parse_value(&args.value);
    let kind = value.kind();
    table.set(&args.name, group, value, !args.transient, false)?;
    save_scope(table, group)?;
    info!(name = %args.name, scope = %group, %kind, "property set");
    println!(
        "{} {} = {} ({})",
        "✓".green().bold(),
        args.name.bold(),
        args.value,
        kind.to_string().cyan()
    );
    Ok(())
}

fn cmd_remove(table: &PropertyTable, args: RemoveArgs) -> anyhow::Result<()> {
    let group = SettingsGroup::from(args.scope);
    if table.remove(&args.name, group)? {
        save_scope(table, group)?;
        info!(name = %args.name, scope = %group, "property removed");
        println!("{} Removed {}.", "✓".green(), args.name.bold());
    } else {
        println!("{} is not set.", args.name.yellow());
    }
    Ok(())
}

fn cmd_migrate(table: &PropertyTable, format: OutputFormat) -> anyhow::Result<()> {
    let report = table.run_migration_if_needed()?;
    info!(
        from = report.from_version,
        to = report.to_version,
        rewritten = report.rewritten.len(),
        "migration finished"
    );
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "from_version": report.from_version,
                "to_version": report.to_version,
                "rewritten": report.rewritten,
            }))?
        ),
        OutputFormat::Text if report.migrated() => {
            println!(
                "{} Migrated settings from version {} to {}.",
                "✓".green().bold(),
                report.from_version,
                report.to_version
            );
            for key in &report.rewritten {
                println!("  rewrote {}", key.yellow());
            }
        }
        OutputFormat::Text => println!(
            "{} Settings already at version {}.",
            "✓".green(),
            report.to_version
        ),
    }
    Ok(())
}

fn save_scope(table: &PropertyTable, group: SettingsGroup) -> anyhow::Result<()> {
    match group {
        SettingsGroup::Global => table.save_global()?,
        SettingsGroup::Local => table.save_local()?,
        SettingsGroup::Best => {
            table.save_global()?;
            table.save_local()?;
        }
    }
    Ok(())
}

/// Interpret a command-line value.
///
/// Tagged payloads (`{"kind": ..., "data": ...}`) are taken as-is. Other JSON
/// maps to the closest payload kind, and text that is not JSON is a string.
pub fn parse_value(text: &str) -> PropertyValue {
    let json: serde_json::Value = match serde_json::from_str(text) {
        Ok(json) => json,
        Err(_) => return PropertyValue::Str(text.to_string()),
    };

    if json.get("kind").is_some() && json.get("data").is_some() {
        if let Ok(tagged) = serde_json::from_value::<PropertyValue>(json.clone()) {
            return tagged;
        }
    }

    match json {
        serde_json::Value::Bool(b) => PropertyValue::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => PropertyValue::Int(i),
            None => PropertyValue::Float(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => PropertyValue::Str(s),
        serde_json::Value::Array(items)
            if !items.is_empty() && items.iter().all(|i| i.is_string()) =>
        {
            PropertyValue::StrList(
                items
                    .into_iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect(),
            )
        }
        other => PropertyValue::Structured(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cli(dir: PathBuf, command: Command) -> Cli {
        Cli {
            command,
            dir: Some(dir),
            local: Some("proj1".into()),
            config: None,
            format: OutputFormat::Text,
        }
    }

    #[test]
    fn parse_plain_text_and_scalars() {
        assert_eq!(parse_value("Dark"), PropertyValue::Str("Dark".into()));
        assert_eq!(parse_value("\"Dark\""), PropertyValue::Str("Dark".into()));
        assert_eq!(parse_value("true"), PropertyValue::Bool(true));
        assert_eq!(parse_value("42"), PropertyValue::Int(42));
        assert_eq!(parse_value("1.5"), PropertyValue::Float(1.5));
    }

    #[test]
    fn parse_lists_and_structures() {
        assert_eq!(
            parse_value(r#"["a","b"]"#),
            PropertyValue::StrList(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            parse_value(r#"[1, "b"]"#),
            PropertyValue::Structured(serde_json::json!([1, "b"]))
        );
        assert_eq!(
            parse_value(r#"{"module": "Views"}"#),
            PropertyValue::Structured(serde_json::json!({"module": "Views"}))
        );
    }

    #[test]
    fn parse_tagged_payload() {
        assert_eq!(
            parse_value(r#"{"kind": "float", "data": 2.0}"#),
            PropertyValue::Float(2.0)
        );
    }

    #[test]
    fn set_then_remove_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        run_command(cli(
            path.clone(),
            Command::Set(SetArgs {
                name: "Theme".into(),
                value: "Dark".into(),
                scope: ScopeArg::Local,
                transient: false,
            }),
        ))
        .unwrap();
        assert!(path.join("db$proj1$Settings.json").exists());

        let table = open_table(&cli(path.clone(), Command::Migrate)).unwrap();
        assert_eq!(
            table.get::<String>("Theme", SettingsGroup::Local).unwrap(),
            "Dark"
        );
        drop(table);

        run_command(cli(
            path.clone(),
            Command::Remove(RemoveArgs {
                name: "Theme".into(),
                scope: ScopeArg::Local,
            }),
        ))
        .unwrap();
        let table = open_table(&cli(path, Command::Migrate)).unwrap();
        assert!(!table.exists("Theme", SettingsGroup::Local).unwrap());
    }

    #[test]
    fn migrate_command_rewrites_and_records_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        run_command(cli(
            path.clone(),
            Command::Set(SetArgs {
                name: "View".into(),
                value: r#"{"module": "ViewsLegacy"}"#.into(),
                scope: ScopeArg::Global,
                transient: false,
            }),
        ))
        .unwrap();
        run_command(cli(path.clone(), Command::Migrate)).unwrap();

        let table = open_table(&cli(path, Command::Migrate)).unwrap();
        assert_eq!(
            table.get::<serde_json::Value>("View", SettingsGroup::Global).unwrap(),
            serde_json::json!({"module": "Views"})
        );
        assert_eq!(
            table
                .get::<i64>(proptable_store::SCHEMA_VERSION_PROPERTY, SettingsGroup::Global)
                .unwrap(),
            proptable_store::CURRENT_SCHEMA_VERSION
        );
    }
}
