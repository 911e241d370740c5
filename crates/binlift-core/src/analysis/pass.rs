use crate::module::Module;
use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::debug;

pub trait Pass: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        "No description provided"
    }

    /// Runs the pass once over the whole module. Returns whether anything changed.
    fn run_on_module(&mut self, module: &mut Module) -> Result<bool>;

    fn modifies_ir(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn std::any::Any;

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

#[derive(Debug, Clone)]
pub struct PassStatistics {
    pub name: String,
    pub duration: Duration,
    pub changed: bool,
}

pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    statistics: Vec<PassStatistics>,
    collect_stats: bool,
}

impl PassManager {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            statistics: Vec::new(),
            collect_stats: false,
        }
    }

    pub fn enable_statistics(&mut self) {
        self.collect_stats = true;
    }

    pub fn register_pass<P: Pass + 'static>(&mut self, pass: P) {
        self.passes.push(Box::new(pass));
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Runs every registered pass once, in registration order.
    pub fn run_all(&mut self, module: &mut Module) -> Result<bool> {
        let mut changed = false;

        for pass in self.passes.iter_mut() {
            let start = if self.collect_stats {
                Some(Instant::now())
            } else {
                None
            };

            let pass_changed = pass.run_on_module(module)?;
            if pass_changed {
                debug!("Pass {} changed {}", pass.name(), module.name);
            }
            changed |= pass_changed;

            if let Some(start) = start {
                self.statistics.push(PassStatistics {
                    name: pass.name().to_string(),
                    duration: start.elapsed(),
                    changed: pass_changed,
                });
            }
        }

        Ok(changed)
    }

    /// Repeats [`PassManager::run_all`] until no pass changes the module or `max_iterations`
    /// rounds have run. Returns the number of rounds.
    pub fn run_to_fixed_point(&mut self, module: &mut Module, max_iterations: usize) -> Result<usize> {
        let mut rounds = 0;
        while rounds < max_iterations {
            rounds += 1;
            if !self.run_all(module)? {
                break;
            }
        }
        Ok(rounds)
    }

    pub fn statistics(&self) -> &[PassStatistics] {
        &self.statistics
    }

    pub fn get_pass<P: Pass + 'static>(&self) -> Option<&P> {
        self.passes
            .iter()
            .find_map(|p| p.as_any().downcast_ref::<P>())
    }

    pub fn get_pass_mut<P: Pass + 'static>(&mut self) -> Option<&mut P> {
        self.passes
            .iter_mut()
            .find_map(|p| p.as_any_mut().downcast_mut::<P>())
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Arch, OperatingSystem};

    struct CountdownPass {
        remaining: usize,
        runs: usize,
    }

    impl Pass for CountdownPass {
        fn name(&self) -> &'static str {
            "countdown"
        }

        fn run_on_module(&mut self, _module: &mut Module) -> Result<bool> {
            self.runs += 1;
            if self.remaining == 0 {
                return Ok(false);
            }
            self.remaining -= 1;
            Ok(true)
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn test_fixed_point_stops_when_nothing_changes() {
        let mut module = Module::new("m", Arch::X86_64, OperatingSystem::Linux);
        let mut manager = PassManager::new();
        manager.enable_statistics();
        manager.register_pass(CountdownPass {
            remaining: 2,
            runs: 0,
        });

        let rounds = manager.run_to_fixed_point(&mut module, 10).unwrap();
        assert_eq!(rounds, 3);
        assert_eq!(manager.get_pass::<CountdownPass>().unwrap().runs, 3);
        assert_eq!(manager.statistics().len(), 3);
        assert!(!manager.statistics()[2].changed);
    }

    #[test]
    fn test_fixed_point_is_bounded() {
        let mut module = Module::new("m", Arch::X86_64, OperatingSystem::Linux);
        let mut manager = PassManager::new();
        manager.register_pass(CountdownPass {
            remaining: 100,
            runs: 0,
        });

        assert_eq!(manager.run_to_fixed_point(&mut module, 4).unwrap(), 4);
    }
}
