use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::pipelines::workflow::{Artifact, Task};

/// JSON statistics artifact: the computed `stat` plus the task's inputs, outputs and params.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatArtifact<S> {
    pub stat: S,
    pub input: BTreeMap<String, Artifact>,
    pub output: BTreeMap<String, Artifact>,
    pub param: BTreeMap<String, String>,
}

impl<S: Serialize> StatArtifact<S> {
    pub fn for_task(task: &Task, stat: S) -> Self {
        StatArtifact {
            stat,
            input: task.inputs.clone(),
            output: task.outputs.clone(),
            param: task.params.clone(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(
            File::create(path).with_context(|| format!("Cannot create {}", path.display()))?,
        );
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}
