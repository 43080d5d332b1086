use clap::{Arg, ArgMatches, Command};
use http_client::HttpClient;
use resource_manager_vcr::{
    connect, run_example, scan_cassette_dir, scenario_name, Cassette, CassetteLibrary, ExampleOptions,
    Interaction, ReqwestClient, SensitiveDataFilter, Settings, VcrMode,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Vault suffix used with cassettes, so a recorded run replays the same URLs.
const CASSETTE_VAULT_SUFFIX: u32 = 1;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let matches = Command::new("rm-example")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Drive the resource manager example and inspect its cassettes")
        .subcommand(
            Command::new("run")
                .about("Run the example live or against a cassette")
                .arg(
                    Arg::new("cassette")
                        .help("Scenario name to record to or replay from")
                        .long("cassette")
                        .short('c'),
                )
                .arg(
                    Arg::new("mode")
                        .help("Cassette mode, defaults to VCR_MODE or 'once'")
                        .long("mode")
                        .short('m')
                        .value_parser(["once", "replay", "bypass"]),
                )
                .arg(
                    Arg::new("dir")
                        .help("Cassette directory, defaults to VCR_CASSETTE_DIR or tests/cassettes")
                        .long("dir")
                        .short('d'),
                )
                .arg(
                    Arg::new("vault-suffix")
                        .help("Numeric suffix for the key vault name")
                        .long("vault-suffix")
                        .value_parser(clap::value_parser!(u32)),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List all requests in a cassette")
                .arg(
                    Arg::new("cassette")
                        .help("Path to the cassette file")
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(
            Command::new("field")
                .about("Extract specific fields from cassette interactions")
                .arg(
                    Arg::new("cassette")
                        .help("Path to the cassette file")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("field")
                        .help("Field path to extract (e.g., 'request.method', 'response.status')")
                        .required(true)
                        .index(2),
                )
                .arg(
                    Arg::new("interaction")
                        .help("Interaction index (0-based). If not specified, shows all interactions")
                        .long("interaction")
                        .short('i')
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            Command::new("fields")
                .about("List all available field paths in a cassette")
                .arg(
                    Arg::new("cassette")
                        .help("Path to the cassette file")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("interaction")
                        .help("Interaction index (0-based). If not specified, shows fields from first interaction")
                        .long("interaction")
                        .short('i')
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            Command::new("scan")
                .about("Check every cassette in a directory for unredacted credentials")
                .arg(
                    Arg::new("dir")
                        .help("Cassette directory")
                        .required(true)
                        .index(1),
                ),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("run", sub_matches)) => run(sub_matches).await,
        Some(("list", sub_matches)) => required(sub_matches, "cassette").and_then(list_requests),
        Some(("field", sub_matches)) => required(sub_matches, "cassette").and_then(|cassette_path| {
            let field_path = required(sub_matches, "field")?;
            let interaction_idx = sub_matches.get_one::<usize>("interaction").copied();
            extract_field(cassette_path, field_path, interaction_idx)
        }),
        Some(("fields", sub_matches)) => required(sub_matches, "cassette").and_then(|cassette_path| {
            let interaction_idx = sub_matches.get_one::<usize>("interaction").copied();
            list_fields(cassette_path, interaction_idx)
        }),
        Some(("scan", sub_matches)) => required(sub_matches, "dir").and_then(scan),
        _ => {
            eprintln!("No subcommand provided. Use --help for usage information.");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str, String> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing argument '{name}'"))
}

fn to_json(value: &Value) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("Failed to serialize output: {e}"))
}

async fn run(matches: &ArgMatches) -> Result<(), String> {
    let mut settings = Settings::from_env().map_err(|e| e.to_string())?;
    if let Some(mode) = matches.get_one::<String>("mode") {
        settings.vcr_mode = mode.parse::<VcrMode>().map_err(|e| e.to_string())?;
    }
    if let Some(dir) = matches.get_one::<String>("dir") {
        settings.cassette_dir = dir.clone();
    }

    let cassette = matches.get_one::<String>("cassette").map(|name| scenario_name(name));
    let vault_suffix = matches.get_one::<u32>("vault-suffix").copied().unwrap_or_else(|| {
        if cassette.is_some() {
            CASSETTE_VAULT_SUFFIX
        } else {
            chrono::Utc::now().timestamp_subsec_nanos() % 1000
        }
    });
    let options = ExampleOptions::new(&settings, vault_suffix);

    let Some(name) = cassette else {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new());
        let client = connect(&settings, http).await.map_err(|e| e.to_string())?;
        return run_example(&client, &options, &mut std::io::stdout())
            .await
            .map_err(|e| e.to_string());
    };

    let session = Arc::new(
        CassetteLibrary::new(&settings.cassette_dir)
            .begin_session(&name, settings.vcr_mode)
            .resource_manager(&settings)
            .build()
            .map_err(|e| e.to_string())?,
    );

    let outcome = match connect(&settings, session.clone()).await {
        Ok(client) => run_example(&client, &options, &mut std::io::stdout()).await,
        Err(e) => Err(e),
    };
    // Flush whatever was recorded even when the run failed part way.
    let saved = session.end_session().await;

    let stats = session.stats().await;
    log::info!(
        "Session '{name}' {:?}: {} recorded, {} suppressed, {} replayed",
        session.phase(),
        stats.recorded,
        stats.suppressed,
        stats.replayed
    );

    outcome.map_err(|e| e.to_string())?;
    saved.map_err(|e| e.to_string())
}

fn scan(dir: &str) -> Result<(), String> {
    let secrets = Settings::from_env()
        .ok()
        .map(|settings| SensitiveDataFilter::from_settings(&settings));
    let analyses = scan_cassette_dir(dir, secrets.as_ref()).map_err(|e| e.to_string())?;

    let mut dirty = Vec::new();
    for analysis in &analyses {
        analysis.print_report();
        if !analysis.is_clean() {
            dirty.push(analysis.file_path.display().to_string());
        }
    }

    let output = json!({
        "cassettes_scanned": analyses.len(),
        "cassettes_with_findings": &dirty,
    });
    println!("{}", to_json(&output)?);

    if dirty.is_empty() {
        Ok(())
    } else {
        Err(format!("{} cassette(s) contain unredacted credentials", dirty.len()))
    }
}

fn load(cassette_path: &str) -> Result<Cassette, String> {
    Cassette::load_from_file(cassette_path).map_err(|e| format!("Failed to load cassette: {e}"))
}

fn list_requests(cassette_path: &str) -> Result<(), String> {
    let cassette = load(cassette_path)?;

    let requests: Vec<Value> = cassette
        .interactions
        .iter()
        .enumerate()
        .map(|(index, interaction)| {
            json!({
                "index": index,
                "method": interaction.request.method,
                "uri": interaction.request.uri,
                "status": interaction.response.status,
                "recorded_at": interaction.recorded_at.to_rfc3339(),
            })
        })
        .collect();

    let output = json!({
        "total_interactions": cassette.len(),
        "recorded_with": cassette.recorded_with,
        "requests": requests
    });

    println!("{}", to_json(&output)?);
    Ok(())
}

fn extract_field(cassette_path: &str, field_path: &str, interaction_idx: Option<usize>) -> Result<(), String> {
    let cassette = load(cassette_path)?;

    if let Some(idx) = interaction_idx {
        let interaction = cassette.interactions.get(idx).ok_or_else(|| {
            format!(
                "Interaction index {idx} out of bounds (total: {})",
                cassette.len()
            )
        })?;
        let value = extract_field_from_interaction(interaction, field_path)?;
        match value {
            Value::String(s) => print!("{s}"),
            other => print!("{}", to_json(&other)?),
        }
    } else {
        let results: Vec<Value> = cassette
            .interactions
            .iter()
            .enumerate()
            .map(|(index, interaction)| {
                let value = extract_field_from_interaction(interaction, field_path).unwrap_or(Value::Null);
                json!({ "index": index, "value": value })
            })
            .collect();
        println!("{}", to_json(&Value::Array(results))?);
    }

    Ok(())
}

fn extract_field_from_interaction(interaction: &Interaction, field_path: &str) -> Result<Value, String> {
    extract_nested_field(&interaction_value(interaction)?, field_path)
}

/// The interaction as JSON, with JSON bodies expanded in place so paths such
/// as `response.body.properties.provisioningState` resolve.
fn interaction_value(interaction: &Interaction) -> Result<Value, String> {
    let mut value =
        serde_json::to_value(interaction).map_err(|e| format!("Failed to serialize interaction: {e}"))?;

    for side in ["request", "response"] {
        if let Some(body) = value.get_mut(side).and_then(|v| v.get_mut("body")) {
            let parsed = body
                .as_str()
                .and_then(|text| serde_json::from_str::<Value>(text).ok())
                .filter(|parsed| parsed.is_object() || parsed.is_array());
            if let Some(parsed) = parsed {
                *body = parsed;
            }
        }
    }
    Ok(value)
}

fn extract_nested_field(value: &Value, field_path: &str) -> Result<Value, String> {
    let mut current = value;

    for part in parse_field_path(field_path) {
        current = match (part, current) {
            (FieldPathPart::Key(key), Value::Object(map)) => map
                .get(&key)
                .ok_or_else(|| format!("Field '{key}' not found in object"))?,
            (FieldPathPart::Key(key), _) => {
                return Err(format!("Cannot access field '{key}' on non-object value"))
            }
            (FieldPathPart::Index(index), Value::Array(arr)) => arr
                .get(index)
                .ok_or_else(|| format!("Array index {index} out of bounds (length: {})", arr.len()))?,
            (FieldPathPart::Index(index), _) => {
                return Err(format!("Cannot access index {index} on non-array value"))
            }
        };
    }

    Ok(current.clone())
}

#[derive(Debug)]
enum FieldPathPart {
    Key(String),
    Index(usize),
}

/// `response.headers.Location[0]` style paths.
fn parse_field_path(field_path: &str) -> Vec<FieldPathPart> {
    let mut parts = Vec::new();
    let mut current_part = String::new();
    let mut chars = field_path.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '.' | '[' => {
                if !current_part.is_empty() {
                    parts.push(FieldPathPart::Key(std::mem::take(&mut current_part)));
                }
                if ch == '[' {
                    let index_str: String = chars.by_ref().take_while(|c| *c != ']').collect();
                    if let Ok(index) = index_str.parse::<usize>() {
                        parts.push(FieldPathPart::Index(index));
                    }
                }
            }
            _ => current_part.push(ch),
        }
    }

    if !current_part.is_empty() {
        parts.push(FieldPathPart::Key(current_part));
    }

    parts
}

fn list_fields(cassette_path: &str, interaction_idx: Option<usize>) -> Result<(), String> {
    let cassette = load(cassette_path)?;

    if cassette.is_empty() {
        return Err("Cassette contains no interactions".to_string());
    }

    let idx = interaction_idx.unwrap_or(0);
    let interaction = cassette.interactions.get(idx).ok_or_else(|| {
        format!(
            "Interaction index {idx} out of bounds (total: {})",
            cassette.len()
        )
    })?;
    let field_paths = leaf_paths(&interaction_value(interaction)?);

    let result = json!({
        "interaction_index": idx,
        "total_interactions": cassette.len(),
        "field_paths": field_paths
    });

    println!("{}", to_json(&result)?);
    Ok(())
}

/// Paths of every leaf value, in document order.
fn leaf_paths(root: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    let mut pending = vec![(String::new(), root)];

    while let Some((path, value)) = pending.pop() {
        let children: Vec<(String, &Value)> = match value {
            Value::Object(map) if !map.is_empty() => map
                .iter()
                .map(|(key, child)| match path.as_str() {
                    "" => (key.clone(), child),
                    _ => (format!("{path}.{key}"), child),
                })
                .collect(),
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .enumerate()
                .map(|(index, child)| (format!("{path}[{index}]"), child))
                .collect(),
            _ => {
                paths.push(path);
                continue;
            }
        };
        pending.extend(children.into_iter().rev());
    }

    paths
}
