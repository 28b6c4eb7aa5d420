//! Deployment artifact loading: one JSON file per target chain carrying the
//! endpoints and contract addresses the pipeline needs.

use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentRaw {
    chain_id: u64,
    rpc: String,
    #[serde(default)]
    rpc_env_var: Option<String>,
    bundler: String,
    entry_point: String,
    factory: String,
    token_paymaster: String,
    #[serde(default)]
    default_token: Option<String>,
    #[serde(default)]
    sponsor_url: Option<String>,
    #[serde(default)]
    history_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub chain_id: u64,
    pub rpc_url: String,
    pub bundler_url: String,
    pub entry_point: Address,
    pub factory: Address,
    pub token_paymaster: Address,
    pub default_token: Option<Address>,
    pub sponsor_url: Option<String>,
    pub history_url: Option<String>,
}

pub fn load_deployment(path: &Path, rpc_override: Option<String>) -> Result<Deployment> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read deployment json at {}", path.display()))?;
    let raw: DeploymentRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse deployment json at {}", path.display()))?;

    let rpc_url = if let Some(rpc) = rpc_override {
        rpc
    } else if let Some(env_var) = raw.rpc_env_var.clone() {
        env::var(&env_var).unwrap_or(raw.rpc.clone())
    } else {
        raw.rpc.clone()
    };

    Ok(Deployment {
        chain_id: raw.chain_id,
        rpc_url,
        bundler_url: raw.bundler.clone(),
        entry_point: parse_addr(&raw.entry_point).context("invalid entryPoint address")?,
        factory: parse_addr(&raw.factory).context("invalid factory address")?,
        token_paymaster: parse_addr(&raw.token_paymaster)
            .context("invalid tokenPaymaster address")?,
        default_token: raw
            .default_token
            .as_deref()
            .map(|s| parse_addr(s).context("invalid defaultToken address"))
            .transpose()?,
        sponsor_url: raw.sponsor_url,
        history_url: raw.history_url,
    })
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_artifact(json: &str) -> tempfile_path::TempPath {
        tempfile_path::write(json)
    }

    // Minimal scoped temp-file helper so tests need no extra crates.
    mod tempfile_path {
        use std::io::Write;
        use std::path::PathBuf;

        pub struct TempPath(pub PathBuf);

        impl Drop for TempPath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }

        pub fn write(contents: &str) -> TempPath {
            let mut path = std::env::temp_dir();
            path.push(format!(
                "aa-userop-test-{}-{:?}.json",
                std::process::id(),
                std::thread::current().id()
            ));
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(contents.as_bytes()).unwrap();
            TempPath(path)
        }
    }

    const ARTIFACT: &str = r#"{
        "chainId": 11155111,
        "rpc": "https://rpc.example",
        "bundler": "https://bundler.example",
        "entryPoint": "0x4337433743374337433743374337433743374337",
        "factory": "0x9406cc6185a346906296840746125a0e44976454",
        "tokenPaymaster": "0x2222222222222222222222222222222222222222",
        "sponsorUrl": "https://sponsor.example/generatePaymasterData"
    }"#;

    #[test]
    fn loads_artifact_with_optional_fields_absent() {
        let tmp = write_artifact(ARTIFACT);
        let dep = load_deployment(&tmp.0, None).unwrap();
        assert_eq!(dep.chain_id, 11155111);
        assert_eq!(dep.rpc_url, "https://rpc.example");
        assert_eq!(dep.entry_point, "0x4337433743374337433743374337433743374337".parse().unwrap());
        assert!(dep.default_token.is_none());
        assert!(dep.history_url.is_none());
        assert_eq!(
            dep.sponsor_url.as_deref(),
            Some("https://sponsor.example/generatePaymasterData")
        );
    }

    #[test]
    fn rpc_override_wins() {
        let tmp = write_artifact(ARTIFACT);
        let dep = load_deployment(&tmp.0, Some("https://other.example".to_string())).unwrap();
        assert_eq!(dep.rpc_url, "https://other.example");
    }

    #[test]
    fn invalid_address_is_an_error() {
        let tmp = write_artifact(&ARTIFACT.replace("0x4337433743374337433743374337433743374337", "nope"));
        assert!(load_deployment(&tmp.0, None).is_err());
    }
}
