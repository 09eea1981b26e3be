// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    pool::{
        self,
        WorkModel,
    },
    scheduler::{
        RunConfig,
        DEFAULT_MS_PER_WORK_UNIT,
        DEFAULT_SLOT_COUNT,
    },
    timer::ClockKind,
};
use ::std::{
    fs,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Cooperative scheduler options.
mod scheduler_config {
    pub const SECTION_NAME: &str = "scheduler";
    pub const SLOT_COUNT: &str = "slot_count";
    // Run budget in milliseconds. Absent means no budget.
    pub const TIMEOUT_MS: &str = "timeout_ms";
    pub const CLOCK: &str = "clock";
}

// Worker pool options. These also drive offloading in the cooperative scheduler.
mod worker_pool_config {
    pub const SECTION_NAME: &str = "worker_pool";
    // Absent means one unit per available processor, null means no pool.
    pub const POOL_SIZE: &str = "pool_size";
    pub const MS_PER_WORK_UNIT: &str = "ms_per_work_unit";
    pub const WORK_MODEL: &str = "work_model";
}

/// Value of the `POOL_SIZE` environment variable that turns the pool off.
const NO_POOL: &str = "none";

//======================================================================================================================
// Structures
//======================================================================================================================

/// Run configuration, read from a YAML document. Every option can be overridden by an environment variable with the
/// option's name in upper case.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let config_s: String = match fs::read_to_string(config_path) {
            Ok(config_s) => config_s,
            Err(e) => {
                let cause: String = format!("cannot read config file (path={:?}, error={:?})", config_path, e);
                error!("new(): {}", cause);
                return Err(Fail::new(libc::ENOENT, &cause));
            },
        };
        Self::from_yaml_str(&config_s)
    }

    /// Parses a configuration held in memory.
    pub fn from_yaml_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed config (error={:?})", e);
                error!("from_yaml_str(): {}", cause);
                return Err(Fail::invalid(&cause));
            },
        };
        let config_obj: &Yaml = match &config[..] {
            [c] => c,
            _ => return Err(Fail::invalid("Wrong number of config objects")),
        };

        Ok(Self(config_obj.clone()))
    }

    fn get_scheduler_config(&self) -> Option<&Yaml> {
        Self::get_subsection(&self.0, scheduler_config::SECTION_NAME)
    }

    fn get_worker_pool_config(&self) -> Option<&Yaml> {
        Self::get_subsection(&self.0, worker_pool_config::SECTION_NAME)
    }

    /// Scheduler config: number of logical slots.
    pub fn slot_count(&self) -> Result<usize, Fail> {
        let slot_count: usize = if let Some(count) = Self::get_typed_env_option(scheduler_config::SLOT_COUNT)? {
            count
        } else {
            match self.get_scheduler_config() {
                Some(section) => {
                    Self::get_int_option(section, scheduler_config::SLOT_COUNT)?.unwrap_or(DEFAULT_SLOT_COUNT)
                },
                None => DEFAULT_SLOT_COUNT,
            }
        };

        if slot_count == 0 {
            let cause: &str = "scheduler needs at least one slot";
            error!("slot_count(): {}", cause);
            return Err(Fail::invalid(cause));
        }
        Ok(slot_count)
    }

    /// Scheduler config: time budget of a run, if any.
    pub fn timeout_ms(&self) -> Result<Option<u64>, Fail> {
        if let Some(timeout_ms) = Self::get_typed_env_option(scheduler_config::TIMEOUT_MS)? {
            return Ok(Some(timeout_ms));
        }
        match self.get_scheduler_config() {
            Some(section) => Self::get_int_option(section, scheduler_config::TIMEOUT_MS),
            None => Ok(None),
        }
    }

    /// Scheduler config: virtual or wall clock.
    pub fn clock(&self) -> Result<ClockKind, Fail> {
        if let Some(clock) = Self::get_typed_env_option(scheduler_config::CLOCK)? {
            return Ok(clock);
        }
        match self.get_scheduler_config() {
            Some(section) => {
                Ok(Self::get_parsed_option(section, scheduler_config::CLOCK)?.unwrap_or(ClockKind::Virtual))
            },
            None => Ok(ClockKind::Virtual),
        }
    }

    /// Worker pool config: number of units, or None when parallel-capable steps stay on the scheduler slots.
    pub fn pool_size(&self) -> Result<Option<usize>, Fail> {
        if let Ok(var) = ::std::env::var(worker_pool_config::POOL_SIZE.to_uppercase()) {
            if var.eq_ignore_ascii_case(NO_POOL) {
                return Ok(None);
            }
            return match var.parse::<usize>() {
                Ok(0) | Err(_) => {
                    let cause: String = format!("parameter {} has unexpected value", worker_pool_config::POOL_SIZE);
                    error!("pool_size(): {}", cause);
                    Err(Fail::invalid(&cause))
                },
                Ok(size) => Ok(Some(size)),
            };
        }

        let section: &Yaml = match self.get_worker_pool_config() {
            Some(section) => section,
            None => return Ok(Some(pool::available_parallelism())),
        };
        match section.index(worker_pool_config::POOL_SIZE) {
            Yaml::BadValue => Ok(Some(pool::available_parallelism())),
            Yaml::Null => Ok(None),
            _ => match Self::get_int_option::<usize>(section, worker_pool_config::POOL_SIZE)? {
                Some(0) => {
                    let cause: &str = "worker pool needs at least one unit";
                    error!("pool_size(): {}", cause);
                    Err(Fail::invalid(cause))
                },
                size => Ok(size),
            },
        }
    }

    /// Worker pool config: milliseconds one unit of compute work costs.
    pub fn ms_per_work_unit(&self) -> Result<u64, Fail> {
        if let Some(ms) = Self::get_typed_env_option(worker_pool_config::MS_PER_WORK_UNIT)? {
            return Ok(ms);
        }
        match self.get_worker_pool_config() {
            Some(section) => Ok(Self::get_int_option(section, worker_pool_config::MS_PER_WORK_UNIT)?
                .unwrap_or(DEFAULT_MS_PER_WORK_UNIT)),
            None => Ok(DEFAULT_MS_PER_WORK_UNIT),
        }
    }

    /// Worker pool config: whether compute burns CPU or sleeps.
    pub fn work_model(&self) -> Result<WorkModel, Fail> {
        if let Some(model) = Self::get_typed_env_option(worker_pool_config::WORK_MODEL)? {
            return Ok(model);
        }
        match self.get_worker_pool_config() {
            Some(section) => {
                Ok(Self::get_parsed_option(section, worker_pool_config::WORK_MODEL)?.unwrap_or(WorkModel::Spin))
            },
            None => Ok(WorkModel::Spin),
        }
    }

    /// Assembles every option into the configuration of a run.
    pub fn run_config(&self) -> Result<RunConfig, Fail> {
        let config: RunConfig = RunConfig {
            slot_count: self.slot_count()?,
            pool_size: self.pool_size()?,
            timeout_ms: self.timeout_ms()?,
            ms_per_work_unit: self.ms_per_work_unit()?,
            clock: self.clock()?,
            work_model: self.work_model()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Index `yaml` to find the subsection at `index`. Missing sections fall back to defaults.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Option<&'a Yaml> {
        let section: &'a Yaml = yaml.index(index);
        match section {
            Yaml::Hash(_) => Some(section),
            _ => None,
        }
    }

    /// Index `yaml` to find the value at `index`. Missing or null options read as None.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Option<&'a Yaml> {
        match yaml.index(index) {
            Yaml::BadValue | Yaml::Null => None,
            value => Some(value),
        }
    }

    /// Reads the environment variable named after `index` in upper case, if it is set.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Reads an integer option, verifying that the destination type may hold its value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<Option<T>, Fail> {
        let option: &Yaml = match Self::get_option(yaml, index) {
            Some(option) => option,
            None => return Ok(None),
        };
        let val: i64 = match option.as_i64() {
            Some(val) => val,
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            },
        };
        match T::try_from(val) {
            Ok(val) => Ok(Some(val)),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    /// Reads a string option and parses it with `FromStr`.
    fn get_parsed_option<T: FromStr<Err = Fail>>(yaml: &Yaml, index: &str) -> Result<Option<T>, Fail> {
        match Self::get_option(yaml, index) {
            Some(option) => match option.as_str() {
                Some(value) => Ok(Some(value.parse()?)),
                None => {
                    let message: String = format!("parameter {} has unexpected type", index);
                    Err(Fail::new(libc::EINVAL, message.as_str()))
                },
            },
            None => Ok(None),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
