use std::path::PathBuf;

use anyhow::Result;
use clap::{arg, command, value_parser, ArgMatches, Command};
use lazydag_core::prelude::GraphFormat;

use crate::tutorial::TutorialConfig;

pub fn create_commands() -> Command {
    command!()
        .about("Runs the delayed tutorial graph add(inc(1), inc(2)) on local workers")
        .arg(
            arg!(
                --n_workers <n_workers> "Number of worker threads"
            )
            .long("n-workers")
            .required(false)
            .value_parser(value_parser!(usize)),
        )
        .arg(
            arg!(
                --data_dir <data_dir> "Directory containing the scores file"
            )
            .long("data-dir")
            .required(false)
            .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(
                --graph <graph> "Graph format: mermaid, dot or tree"
            )
            .required(false)
            .value_parser(value_parser!(String)),
        )
        .arg(
            arg!(
                --graph_output <graph_output> "Write the graph to this file instead of stdout"
            )
            .long("graph-output")
            .required(false)
            .value_parser(value_parser!(PathBuf)),
        )
}

/// Command line values override `defaults`.
pub fn config_from_matches(
    matches: &ArgMatches,
    defaults: TutorialConfig,
) -> Result<TutorialConfig> {
    let graph_format = match matches.get_one::<String>("graph") {
        Some(graph) => graph.parse::<GraphFormat>()?,
        None => defaults.graph_format,
    };

    Ok(TutorialConfig {
        n_workers: matches
            .get_one::<usize>("n_workers")
            .copied()
            .unwrap_or(defaults.n_workers),
        data_dir: matches
            .get_one::<PathBuf>("data_dir")
            .cloned()
            .unwrap_or(defaults.data_dir),
        graph_format,
        graph_output: matches
            .get_one::<PathBuf>("graph_output")
            .cloned()
            .or(defaults.graph_output),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> TutorialConfig {
        TutorialConfig {
            n_workers: 4,
            data_dir: PathBuf::from("data"),
            graph_format: GraphFormat::Mermaid,
            graph_output: None,
        }
    }

    #[test]
    fn test_defaults() {
        let matches = create_commands().get_matches_from(["lazydag"]);
        let config = config_from_matches(&matches, defaults()).unwrap();

        assert_eq!(config, defaults());
    }

    #[test]
    fn test_overrides() {
        let matches = create_commands().get_matches_from([
            "lazydag",
            "--n-workers",
            "2",
            "--data-dir",
            "/tmp/scores",
            "--graph",
            "dot",
            "--graph-output",
            "mydask.dot",
        ]);
        let config = config_from_matches(&matches, defaults()).unwrap();

        assert_eq!(config.n_workers, 2);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/scores"));
        assert_eq!(config.graph_format, GraphFormat::Dot);
        assert_eq!(config.graph_output, Some(PathBuf::from("mydask.dot")));
    }

    #[test]
    fn test_unknown_graph_format() {
        let matches = create_commands().get_matches_from(["lazydag", "--graph", "png"]);

        assert!(config_from_matches(&matches, defaults()).is_err());
    }

    #[test]
    fn test_command_is_valid() {
        create_commands().debug_assert();
    }
}
