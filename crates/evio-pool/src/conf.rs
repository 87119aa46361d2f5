//! `thread_pool` directive parsing and the pool registry.
//!
//! Configuration happens in two phases. At load time directives are
//! parsed into [`PoolConf`] entries and other subsystems *reference*
//! pools by name ([`PoolRegistry::add`]); [`PoolRegistry::finalize`]
//! then fills in the auto-provided `default` pool and rejects any
//! referenced pool that was never declared. At worker start
//! [`PoolRegistry::init_worker`] instantiates the pools — threads and
//! notify channels exist only in worker and single-process roles.

use std::fmt;
use std::sync::Arc;

use evio_core::driver::Driver;
use evio_core::Result;
use evio_runtime::ProcessRole;

use crate::pool::ThreadPool;
use crate::{DEFAULT_MAX_QUEUE, DEFAULT_POOL_NAME, DEFAULT_THREADS};

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    BadDirective { line: usize, what: String },
    InvalidValue { line: usize, param: String },
    Duplicate { line: usize, name: String },
    MissingThreads { line: usize, name: String },
    UnknownPool { name: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadDirective { line, what } => {
                write!(f, "line {}: bad thread_pool directive: {}", line, what)
            }
            Self::InvalidValue { line, param } => {
                write!(f, "line {}: invalid {} value", line, param)
            }
            Self::Duplicate { line, name } => {
                write!(f, "line {}: duplicate thread pool \"{}\"", line, name)
            }
            Self::MissingThreads { line, name } => {
                write!(f, "line {}: thread pool \"{}\" must have \"threads\" parameter", line, name)
            }
            Self::UnknownPool { name } => {
                write!(f, "unknown thread pool \"{}\"", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// A declared or referenced pool. `threads == 0` means referenced but
/// not declared yet.
#[derive(Debug, Clone)]
pub struct PoolConf {
    pub name: String,
    pub threads: usize,
    pub max_queue: i64,
}

pub struct PoolRegistry {
    confs: Vec<PoolConf>,
}

impl PoolRegistry {
    pub fn new() -> PoolRegistry {
        PoolRegistry { confs: Vec::new() }
    }

    /// Scan configuration text for `thread_pool` directives. Lines
    /// holding other directives are ignored; `#` starts a comment.
    pub fn parse(&mut self, text: &str) -> std::result::Result<(), ConfigError> {
        for (n, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim().trim_end_matches(';');
            if line.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens[0] == "thread_pool" {
                self.directive(n + 1, &tokens[1..])?;
            }
        }
        Ok(())
    }

    fn directive(&mut self, line: usize, args: &[&str]) -> std::result::Result<(), ConfigError> {
        let name = match args.first() {
            Some(name) => *name,
            None => {
                return Err(ConfigError::BadDirective {
                    line,
                    what: "missing pool name".into(),
                })
            }
        };

        let idx = self.add(name);
        if self.confs[idx].threads != 0 {
            return Err(ConfigError::Duplicate {
                line,
                name: name.into(),
            });
        }
        self.confs[idx].max_queue = DEFAULT_MAX_QUEUE;

        for arg in &args[1..] {
            if let Some(v) = arg.strip_prefix("threads=") {
                let threads = v.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                    line,
                    param: "threads".into(),
                })?;
                if threads == 0 {
                    return Err(ConfigError::InvalidValue {
                        line,
                        param: "threads".into(),
                    });
                }
                self.confs[idx].threads = threads;
            } else if let Some(v) = arg.strip_prefix("max_queue=") {
                self.confs[idx].max_queue =
                    v.parse::<i64>().map_err(|_| ConfigError::InvalidValue {
                        line,
                        param: "max_queue".into(),
                    })?;
            } else {
                return Err(ConfigError::BadDirective {
                    line,
                    what: format!("unknown parameter \"{}\"", arg),
                });
            }
        }

        if self.confs[idx].threads == 0 {
            return Err(ConfigError::MissingThreads {
                line,
                name: name.into(),
            });
        }

        Ok(())
    }

    /// Reference a pool by name, creating an undeclared entry when it
    /// is new. Returns its index.
    pub fn add(&mut self, name: &str) -> usize {
        if let Some(i) = self.confs.iter().position(|c| c.name == name) {
            return i;
        }
        self.confs.push(PoolConf {
            name: name.to_owned(),
            threads: 0,
            max_queue: DEFAULT_MAX_QUEUE,
        });
        self.confs.len() - 1
    }

    pub fn get(&self, name: &str) -> Option<&PoolConf> {
        self.confs.iter().find(|c| c.name == name)
    }

    /// Close the configuration: auto-provide `default` and reject any
    /// referenced pool that no directive declared.
    pub fn finalize(&mut self) -> std::result::Result<(), ConfigError> {
        let idx = self.add(DEFAULT_POOL_NAME);
        if self.confs[idx].threads == 0 {
            self.confs[idx].threads = DEFAULT_THREADS;
            self.confs[idx].max_queue = DEFAULT_MAX_QUEUE;
        }

        for conf in &self.confs {
            if conf.threads == 0 {
                return Err(ConfigError::UnknownPool {
                    name: conf.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.confs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confs.is_empty()
    }

    /// Instantiate every configured pool: threads started, notify
    /// channels registered with `driver`. Master processes get an
    /// empty set.
    pub fn init_worker(&self, role: ProcessRole, driver: &dyn Driver) -> Result<PoolSet> {
        let mut set = PoolSet { pools: Vec::new() };
        if !role.runs_pools() {
            return Ok(set);
        }

        for conf in &self.confs {
            let pool = Arc::new(ThreadPool::new(&conf.name, conf.threads, conf.max_queue)?);
            pool.init(driver)?;
            set.pools.push(pool);
        }
        Ok(set)
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        PoolRegistry::new()
    }
}

/// The pools running in this worker.
pub struct PoolSet {
    pools: Vec<Arc<ThreadPool>>,
}

impl PoolSet {
    pub fn empty() -> PoolSet {
        PoolSet { pools: Vec::new() }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ThreadPool>> {
        self.pools.iter().find(|p| p.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ThreadPool>> {
        self.pools.iter()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Tear every pool down. Call on the reactor thread at worker
    /// exit.
    pub fn exit_worker(self) {
        for pool in &self.pools {
            pool.destroy();
        }
    }
}
