use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use lazydag_core::prelude::*;
use lazydag_utils::{get_data_dir, get_n_workers, read_text_file};
use log::info;

/// Stand-in for real computational work.
pub const WORK_DELAY: Duration = Duration::from_secs(1);

pub const SCORES_FILE_NAME: &str = "score_group1.txt";

pub fn inc(x: i64) -> i64 {
    thread::sleep(WORK_DELAY);
    x + 1
}

pub fn add((x, y): (i64, i64)) -> i64 {
    thread::sleep(WORK_DELAY);
    x + y
}

pub fn scores_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SCORES_FILE_NAME)
}

pub fn read_scores(data_dir: &Path) -> Result<String> {
    read_text_file(&scores_path(data_dir))
}

/// `add(inc(1), inc(2))`, recorded but not run.
pub fn build_graph(graph: &Graph) -> Result<Delayed<i64>> {
    let x = graph.delayed(inc, 1)?;
    let y = graph.delayed(inc, 2)?;
    graph.delayed(add, (&x, &y))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TutorialConfig {
    pub n_workers: usize,
    pub data_dir: PathBuf,
    pub graph_format: GraphFormat,
    pub graph_output: Option<PathBuf>,
}

impl TutorialConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            n_workers: get_n_workers()?,
            data_dir: get_data_dir(),
            graph_format: GraphFormat::default(),
            graph_output: None,
        })
    }

    /// `graph_output`, given the format's extension when it has none.
    pub fn graph_output_path(&self) -> Option<PathBuf> {
        let path = self.graph_output.as_ref()?;
        if path.extension().is_some() {
            return Some(path.clone());
        }
        Some(path.with_extension(self.graph_format.file_extension()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TutorialOutput {
    pub graph: String,
    pub total: i64,
    pub scores: String,
}

pub fn run(config: &TutorialConfig) -> Result<TutorialOutput> {
    let client = Client::new(ClientOptions {
        n_workers: config.n_workers,
        processes: false,
    })?;

    let graph = Graph::new("tutorial");
    let total = build_graph(&graph)?;

    let rendered = total.visualize(config.graph_format);
    match config.graph_output_path() {
        Some(path) => {
            fs::write(&path, &rendered)
                .with_context(|| format!("couldn't write graph to {}", path.display()))?;
            info!("wrote {} graph to {}", config.graph_format, path.display());
        }
        None => print!("{rendered}"),
    }

    let value = client.compute(&total)?;
    info!("computed {value}");

    let path = scores_path(&config.data_dir);
    let scores = read_scores(&config.data_dir)?;
    info!("read {} bytes from {}", scores.len(), path.display());

    Ok(TutorialOutput {
        graph: rendered,
        total: value,
        scores,
    })
}
