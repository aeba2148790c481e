//! Build script for dispatch-runtime
//!
//! Merges configuration defaults:
//! 1. Start with library defaults
//! 2. If DSP_CONFIG_RS is set, parse the user's config file
//! 3. Merge user values over defaults (user wins)
//! 4. Generate OUT_DIR/dsp_merged_config.rs
//!
//! The user file only lists the values it wants to change, one
//! `pub const NAME: TYPE = VALUE;` per line.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "NUM_WORKERS",
        rust_type: "usize",
        default_value: "1",
    },
    ConfigParam {
        name: "STACK_SIZE",
        rust_type: "usize",
        default_value: "256 * 1024",
    },
    ConfigParam {
        name: "STOP_GRACE_MS",
        rust_type: "u64",
        default_value: "1000",
    },
    ConfigParam {
        name: "IDLE_SPINS",
        rust_type: "u32",
        default_value: "64",
    },
    ConfigParam {
        name: "PARK_TIMEOUT_MS",
        rust_type: "u64",
        default_value: "100",
    },
    ConfigParam {
        name: "LOCAL_QUEUE_CAPACITY",
        rust_type: "usize",
        default_value: "256",
    },
    ConfigParam {
        name: "TIMER_MAX_POLL_US",
        rust_type: "u64",
        default_value: "1000",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("dsp_merged_config.rs");

    let mut config: HashMap<&str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    let user_path = env::var("DSP_CONFIG_RS").ok();
    if let Some(ref path) = user_path {
        println!("cargo:rerun-if-changed={}", path);
        match fs::read_to_string(path) {
            Ok(content) => {
                for name in parse_and_merge(&content, &mut config) {
                    println!("cargo:warning=Unknown config parameter: {}", name);
                }
                println!("cargo:warning=Using custom config: {}", path);
            }
            Err(e) => {
                println!("cargo:warning=Failed to read DSP_CONFIG_RS ({}): {}", path, e);
            }
        }
    }
    println!("cargo:rerun-if-env-changed=DSP_CONFIG_RS");

    let output = generate_config(&config, user_path.as_deref());
    fs::write(&dest_path, output).expect("Failed to write merged config");
}

/// Merge `pub const` lines from `content` into `config`.
/// Returns the names that are not known parameters.
fn parse_and_merge(content: &str, config: &mut HashMap<&str, String>) -> Vec<String> {
    let mut unknown = Vec::new();
    for line in content.lines().map(str::trim) {
        if !line.starts_with("pub const ") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => unknown.push(name),
        }
    }
    unknown
}

/// Parse `pub const NAME: TYPE = VALUE;` into (NAME, VALUE)
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();
    let (name, rest) = rest.split_once(':')?;
    let (_, value) = rest.split_once('=')?;
    let value = value.trim().trim_end_matches(';').trim();
    Some((name.trim().to_string(), value.to_string()))
}

fn generate_config(config: &HashMap<&str, String>, user_path: Option<&str>) -> String {
    let mut output = String::from("// Auto-generated by build.rs - do not edit\n");
    match user_path {
        Some(path) => output.push_str(&format!("// Library defaults merged with {}\n\n", path)),
        None => output.push_str("// Library defaults\n\n"),
    }
    for param in CONFIG_PARAMS {
        let value = config
            .get(param.name)
            .map(String::as_str)
            .unwrap_or(param.default_value);
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_const_line() {
        assert_eq!(
            parse_const_line("pub const NUM_WORKERS: usize = 4;"),
            Some(("NUM_WORKERS".into(), "4".into()))
        );
        assert_eq!(
            parse_const_line("pub const STACK_SIZE: usize = 512 * 1024;"),
            Some(("STACK_SIZE".into(), "512 * 1024".into()))
        );
        assert_eq!(parse_const_line("pub const BROKEN"), None);
    }

    #[test]
    fn test_parse_and_merge() {
        let mut config: HashMap<&str, String> = HashMap::new();
        config.insert("NUM_WORKERS", "1".into());

        let unknown = parse_and_merge(
            r#"
            // custom
            pub const NUM_WORKERS: usize = 3;
            pub const STOP_GRACE_MS: u64 = 50;
            pub const TIME_SLICE_MS: u64 = 5;
            "#,
            &mut config,
        );

        assert_eq!(config.get("NUM_WORKERS"), Some(&"3".to_string()));
        assert_eq!(config.get("STOP_GRACE_MS"), Some(&"50".to_string()));
        assert_eq!(unknown, vec!["TIME_SLICE_MS".to_string()]);
    }
}
