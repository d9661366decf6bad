//! Test data builders for creating process lists

use tomoflow::config::{
    Fill, IterateGroupConfig, LoaderConfig, PatternConfig, PluginEntry, ProcessList,
};
use tomoflow::pipeline::PluginKind;
use tomoflow::types::DType;

/// Builder for creating test loaders
pub struct LoaderBuilder {
    config: LoaderConfig,
}

impl LoaderBuilder {
    /// A float dataset with a PROJECTION pattern slicing dimension 0.
    pub fn new(name: &str, shape: &[usize]) -> Self {
        let core: Vec<isize> = (1..shape.len() as isize).collect();
        Self {
            config: LoaderConfig {
                name: name.to_string(),
                shape: shape.to_vec(),
                dtype: DType::Float32,
                axis_labels: Vec::new(),
                patterns: vec![PatternConfig {
                    name: "PROJECTION".to_string(),
                    core_dims: core,
                    slice_dims: vec![0],
                }],
                volume_patterns: None,
                fill: Fill::Ramp,
            },
        }
    }

    pub fn pattern(mut self, name: &str, core_dims: &[isize], slice_dims: &[isize]) -> Self {
        self.config.patterns.push(PatternConfig {
            name: name.to_string(),
            core_dims: core_dims.to_vec(),
            slice_dims: slice_dims.to_vec(),
        });
        self
    }

    pub fn fill(mut self, fill: Fill) -> Self {
        self.config.fill = fill;
        self
    }

    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.config.axis_labels = labels.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn build(self) -> LoaderConfig {
        self.config
    }
}

/// Builder for creating test process lists
#[derive(Default)]
pub struct ProcessListBuilder {
    list: ProcessList,
}

impl ProcessListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processes(mut self, processes: usize) -> Self {
        self.list.negotiation.processes = processes;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.list.negotiation.utilisation_threshold = threshold;
        self
    }

    pub fn loader(mut self, loader: LoaderConfig) -> Self {
        self.list.loaders.push(loader);
        self
    }

    /// Add a plugin; `params` is a TOML fragment.
    pub fn plugin(mut self, kind: PluginKind, ins: &[&str], outs: &[&str], params: &str) -> Self {
        let mut entry = PluginEntry::new(kind);
        entry.in_datasets = ins.iter().map(|s| s.to_string()).collect();
        entry.out_datasets = outs.iter().map(|s| s.to_string()).collect();
        entry.params = toml::from_str(params).expect("bad params in test");
        self.list.plugins.push(entry);
        self
    }

    /// Iterate process-list entries `start..=end`.
    pub fn group(mut self, start: usize, end: usize, iterations: usize) -> Self {
        self.list.iterate_groups.push(IterateGroupConfig {
            start,
            end,
            iterations,
        });
        self
    }

    pub fn build(self) -> ProcessList {
        self.list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_list_builder() {
        let list = ProcessListBuilder::new()
            .processes(2)
            .loader(LoaderBuilder::new("tomo", &[4, 2, 2]).build())
            .plugin(PluginKind::Passthrough, &["tomo"], &["copy"], "")
            .group(2, 2, 3)
            .build();

        assert_eq!(list.negotiation.processes, 2);
        assert_eq!(list.loaders[0].patterns[0].core_dims, vec![1, 2]);
        assert_eq!(list.iterate_groups.len(), 1);
    }
}
