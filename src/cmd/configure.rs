//! Interactive configuration setup
//!
//! Walks through the handful of settings that can't sensibly ship with a
//! baked-in default (bind address, boot mode, Docker socket) and writes a
//! `config.toml` a first run can load directly.

use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;

pub async fn run() -> Result<()> {
    println!("Arcane Configuration Setup");
    println!("==========================\n");

    let mode = prompt("Boot mode [manager/agent]", "manager")?;
    let host = prompt("API bind host", "0.0.0.0")?;
    let port = prompt("API bind port", "8080")?;
    let docker_socket = prompt("Docker socket", &default_docker_socket())?;
    let data_dir = prompt("Data directory", ".arcane/data")?;

    let agent_token = if mode.eq_ignore_ascii_case("agent") {
        prompt("Agent bearer token (shared with the manager)", "")?
    } else {
        String::new()
    };

    let contents = format!(
        r#"mode = "{mode}"

[api]
host = "{host}"
port = {port}

[system]
data_directory = "{data_dir}"

[docker]
socket = "{docker_socket}"

[agent]
token = "{agent_token}"
"#
    );

    let path = Path::new("config.toml");
    if path.exists() {
        let overwrite = prompt("config.toml already exists, overwrite? [y/N]", "n")?;
        if !overwrite.eq_ignore_ascii_case("y") {
            println!("Aborted, nothing written.");
            return Ok(());
        }
    }

    std::fs::write(path, contents)?;
    println!("\nWrote {}", path.display());
    Ok(())
}

fn prompt(label: &str, default: &str) -> Result<String> {
    if default.is_empty() {
        print!("{label}: ");
    } else {
        print!("{label} [{default}]: ");
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();
    Ok(if trimmed.is_empty() { default.to_string() } else { trimmed.to_string() })
}

fn default_docker_socket() -> String {
    #[cfg(target_os = "windows")]
    {
        "npipe:////./pipe/docker_engine".to_string()
    }
    #[cfg(not(target_os = "windows"))]
    {
        "/var/run/docker.sock".to_string()
    }
}
