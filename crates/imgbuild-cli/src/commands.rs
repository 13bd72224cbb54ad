//! CLI command implementations

use anyhow::{Context, Result};
use imgbuild_config::GlobalConfig;
use imgbuild_core::{Builder, ErrorHandler, Hooks};
use imgbuild_provider::BuildOptions;
use std::io::Write;
use std::path::PathBuf;

/// Resolved arguments for `imgbuild build`
pub struct BuildArgs {
    pub dir: PathBuf,
    pub tag: Option<String>,
    pub dockerfile: String,
    pub build_args: Vec<(String, String)>,
    pub no_cache: bool,
    pub pull: bool,
    pub json: bool,
}

impl BuildArgs {
    fn options(&self) -> BuildOptions {
        let mut options = BuildOptions {
            tag: self.tag.clone(),
            dockerfile: self.dockerfile.clone(),
            no_cache: self.no_cache,
            pull: self.pull,
            ..BuildOptions::default()
        };
        for (key, value) in &self.build_args {
            options = options.build_arg(key, value);
        }
        options
    }
}

/// Build an image from a directory, streaming progress to the terminal
pub async fn build(builder: &Builder, args: BuildArgs) -> Result<()> {
    let json = args.json;
    let hooks = Hooks::new()
        .on_build_stream(move |stream| async move {
            let Some(mut output) = stream.take_output() else {
                return Ok(());
            };
            while let Some(line) = output.next_line().await {
                // The failure itself is reported by the failure hook
                let Ok(line) = line else { break };
                if json {
                    eprint!("{}", line);
                } else {
                    print!("{}", line);
                    std::io::stdout().flush()?;
                }
            }
            Ok(())
        })
        .on_build_success(|last_layer, layers, _| async move {
            match last_layer {
                Some(id) => eprintln!("Successfully built {} ({} layers)", id, layers.len()),
                None => eprintln!("Build finished without reporting a layer"),
            }
            Ok(())
        })
        .on_build_failure(|error, layers, _| async move {
            eprintln!("Build failed after {} layers: {}", layers.len(), error);
            Ok(())
        });
    let handler = ErrorHandler::new(|e| eprintln!("Warning: {:#}", e));

    let stream = builder
        .build_dir(&args.dir, args.options(), hooks, handler)
        .await
        .with_context(|| format!("Failed to prepare build context {}", args.dir.display()))?;

    let outcome = tokio::select! {
        outcome = stream.finished() => outcome,
        _ = tokio::signal::ctrl_c() => {
            stream.destroy("interrupted");
            stream.finished().await
        }
    };
    let summary = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

/// Show the config file, or the defaults if none exists
pub fn config(config: &GlobalConfig, init: bool) -> Result<()> {
    let config_path = GlobalConfig::config_path()?;

    if init && !config_path.exists() {
        GlobalConfig::default().save_to(&config_path)?;
        println!("Created default config at {:?}", config_path);
        return Ok(());
    }

    if config_path.exists() {
        println!("# Config file: {:?}\n", config_path);
    } else {
        println!("# Config file: {:?} (not created yet)\n", config_path);
    }
    println!("{}", toml::to_string_pretty(config)?);
    if !config_path.exists() {
        println!("# Run 'imgbuild config --init' to create the config file.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args_to_options() {
        let args = BuildArgs {
            dir: PathBuf::from("."),
            tag: Some("app:dev".to_string()),
            dockerfile: "docker/Dockerfile.dev".to_string(),
            build_args: vec![("VERSION".to_string(), "1.2".to_string())],
            no_cache: true,
            pull: false,
            json: false,
        };
        let options = args.options();

        assert_eq!(options.tag.as_deref(), Some("app:dev"));
        assert_eq!(options.dockerfile, "docker/Dockerfile.dev");
        assert_eq!(options.build_args.get("VERSION").map(String::as_str), Some("1.2"));
        assert!(options.no_cache);
        assert!(options.rm);
    }
}
