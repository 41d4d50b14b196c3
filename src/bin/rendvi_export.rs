use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Builder, Env};

use rendvi::config::PipelineConfig;
use rendvi::engine::RemoteEngine;
use rendvi::io::Catalog;
use rendvi::pipeline;

#[derive(Parser, Debug)]
#[command(name = "rendvi-export")]
#[command(version, about = "Build the reNDVI series and export one asset per dekad", long_about = None)]
struct Cli {
    /// Pipeline configuration (JSON)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Product catalog (JSON); the built-in catalog when omitted
    #[arg(short, long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Asset folder receiving the exports
    #[arg(short, long, value_name = "FOLDER")]
    asset_root: Option<String>,

    /// First year to process
    #[arg(long, value_name = "YEAR")]
    start_year: Option<i32>,

    /// Last year to process, inclusive
    #[arg(long, value_name = "YEAR")]
    end_year: Option<i32>,

    /// Cloud project billed for the requests
    #[arg(long, value_name = "PROJECT")]
    project: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(root) = &self.asset_root {
            config.export.asset_root = root.clone();
        }
        if let Some(year) = self.start_year {
            config.start_year = year;
        }
        if let Some(year) = self.end_year {
            config.end_year = year;
        }
        if let Some(project) = &self.project {
            config.engine.project = project.clone();
        }
    }
}

fn main() -> Result<()> {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load configuration {}", cli.config.display()))?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration after command line overrides")?;

    let catalog = match &cli.catalog {
        Some(path) => {
            Catalog::from_file(path).with_context(|| format!("failed to load catalog {}", path.display()))?
        }
        None => Catalog::builtin(),
    };

    let engine = RemoteEngine::new(config.engine.clone()).context("failed to create engine client")?;
    let task_ids = pipeline::run(&engine, &config, &catalog)?;

    log::info!("Submitted {} export tasks", task_ids.len());
    for id in &task_ids {
        log::debug!("task {}", id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let cli = Cli::try_parse_from([
            "rendvi-export",
            "run.json",
            "--catalog",
            "catalog.json",
            "--asset-root",
            "users/me/rendvi",
            "--start-year",
            "2015",
            "--project",
            "my-project",
        ])
        .unwrap();
        assert_eq!(cli.catalog, Some(PathBuf::from("catalog.json")));

        let mut config = PipelineConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.export.asset_root, "users/me/rendvi");
        assert_eq!(config.start_year, 2015);
        assert_eq!(config.end_year, PipelineConfig::default().end_year);
        assert_eq!(config.engine.project, "my-project");
    }

    #[test]
    fn test_config_path_is_required() {
        assert!(Cli::try_parse_from(["rendvi-export"]).is_err());
    }
}
