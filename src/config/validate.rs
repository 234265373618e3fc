// src/config/validate.rs

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{
    Catalog, CatalogJob, JobConfig, ParameterConfig, ParameterType, RawCatalogFile,
};
use crate::engine::access::{candidate_names, parent_folder};
use crate::engine::{GrantTable, JobDescriptor, ParamValue, ParameterDefinition, ParameterKind};
use crate::errors::{Result, TriggerError};
use crate::types::Principal;

impl TryFrom<RawCatalogFile> for Catalog {
    type Error = TriggerError;

    fn try_from(raw: RawCatalogFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_catalog(&raw)?;

        let quiet_period = parse_duration(&raw.config.quiet_period).map_err(config_error)?;
        let run_as = parse_principal(raw.config.run_as.as_deref())?.unwrap_or_default();
        let grants = raw.access.as_ref().map(|access| {
            let mut table = GrantTable::new();
            for grant in &access.grant {
                for job in &grant.jobs {
                    table.grant(
                        &grant.principal,
                        job,
                        grant.permissions.iter().copied().map(Into::into),
                    );
                }
            }
            table
        });

        let mut jobs = BTreeMap::new();
        for (name, job) in raw.job {
            let built = build_job(&name, job)?;
            jobs.insert(name, built);
        }

        Ok(Catalog::new_unchecked(
            raw.config.executors,
            quiet_period,
            run_as,
            grants,
            jobs,
        ))
    }
}

fn validate_raw_catalog(cfg: &RawCatalogFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_job_names(cfg)?;
    validate_parameters(cfg)?;
    validate_trigger_graph(cfg)?;
    Ok(())
}

fn config_error(msg: String) -> TriggerError {
    TriggerError::ConfigError(msg)
}

fn ensure_has_jobs(cfg: &RawCatalogFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(config_error(
            "catalog must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_job_names(cfg: &RawCatalogFile) -> Result<()> {
    for name in cfg.job.keys() {
        let bad_segment = name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
        if bad_segment {
            return Err(config_error(format!(
                "job name '{name}' must be a slash-separated path without empty, '.' or '..' segments"
            )));
        }
    }
    Ok(())
}

fn validate_parameters(cfg: &RawCatalogFile) -> Result<()> {
    for (job, job_cfg) in cfg.job.iter() {
        let mut seen = HashSet::new();
        for param in job_cfg.parameter.iter() {
            if !seen.insert(param.name.as_str()) {
                return Err(config_error(format!(
                    "job '{job}' declares parameter '{}' more than once",
                    param.name
                )));
            }
            validate_parameter(job, param)?;
        }
    }
    Ok(())
}

fn validate_parameter(job: &str, param: &ParameterConfig) -> Result<()> {
    match (param.kind, &param.default) {
        (ParameterType::Choice, _) if param.choices.is_empty() => Err(config_error(format!(
            "choice parameter '{}' of job '{job}' needs at least one entry in `choices`",
            param.name
        ))),
        (ParameterType::Choice, Some(ParamValue::String(default)))
            if !param.choices.contains(default) =>
        {
            Err(config_error(format!(
                "default '{default}' of choice parameter '{}' in job '{job}' is not one of its choices",
                param.name
            )))
        }
        (ParameterType::Boolean, Some(ParamValue::String(_)))
        | (ParameterType::String, Some(ParamValue::Bool(_)))
        | (ParameterType::Choice, Some(ParamValue::Bool(_))) => Err(config_error(format!(
            "default of parameter '{}' in job '{job}' does not match its type",
            param.name
        ))),
        _ => Ok(()),
    }
}

/// Nested triggers must not form a cycle, or a single build would trigger
/// itself forever.
fn validate_trigger_graph(cfg: &RawCatalogFile) -> Result<()> {
    // Edge direction: orchestrator -> target.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.job.keys() {
        graph.add_node(name.as_str());
    }

    for (name, job) in cfg.job.iter() {
        for trigger in job.trigger.iter() {
            let target = candidate_names(&trigger.target, parent_folder(name))
                .into_iter()
                .find_map(|candidate| cfg.job.get_key_value(&candidate).map(|(k, _)| k.as_str()));
            // Unresolvable references fail at trigger time with `NotFound`.
            if let Some(target) = target {
                graph.add_edge(name.as_str(), target, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(TriggerError::JobCycle(format!(
            "cycle detected in job triggers involving job '{}'",
            cycle.node_id()
        ))),
    }
}

fn build_job(name: &str, job: JobConfig) -> Result<CatalogJob> {
    let quiet_period = job
        .quiet_period
        .as_deref()
        .map(parse_duration)
        .transpose()
        .map_err(config_error)?;
    let duration = job
        .duration
        .as_deref()
        .map(parse_duration)
        .transpose()
        .map_err(config_error)?;
    let run_as = parse_principal(job.run_as.as_deref())?;

    let parameters = job.parameter.into_iter().map(build_parameter).collect();

    Ok(CatalogJob {
        descriptor: JobDescriptor {
            full_name: name.to_string(),
            parameters,
            quiet_period,
        },
        cmd: job.cmd,
        result: job.result.unwrap_or_default(),
        duration,
        variables: job.variables,
        triggers: job.trigger,
        parallel: job.parallel,
        run_as,
    })
}

fn build_parameter(param: ParameterConfig) -> ParameterDefinition {
    let kind = match param.kind {
        ParameterType::String => ParameterKind::String,
        ParameterType::Boolean => ParameterKind::Boolean,
        ParameterType::Choice => ParameterKind::Choice {
            choices: param.choices,
        },
    };
    ParameterDefinition {
        name: param.name,
        kind,
        default: param.default,
        description: param.description,
    }
}

fn parse_principal(name: Option<&str>) -> Result<Option<Principal>> {
    name.map(|n| n.parse::<Principal>().map_err(config_error))
        .transpose()
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' too large")),
        "h" => value
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' too large")),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
