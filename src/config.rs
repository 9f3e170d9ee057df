use std::env;
use std::str::FromStr;
use std::path::PathBuf;

use super::error::{Result,Error};
use super::series::EntityKey;
use super::csse;


/// Settings read from the environment, `.env` included.
#[derive(Clone,Debug)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
    pub r_table: PathBuf,
    pub correct_weeks: usize,
    pub spline_smoothing: f64,
    pub spline_degree: usize,
    pub generation_interval: f64,
    pub entities: Vec<EntityKey>,
}

impl Config {

    pub fn from_env() -> Result<Self> {
	Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {

	let path = |name: &str, default: &str| PathBuf::from(lookup(name).unwrap_or_else(|| default.to_string()));

	let entities = lookup("COVID_ENTITIES")
	    .unwrap_or_else(|| "Germany/Germany".to_string())
	    .split(';')
	    .map(|e| e.trim())
	    .filter(|e| !e.is_empty())
	    .map(|e| match e.split_once('/') {
		Some((country,region)) => Ok(EntityKey::new(csse::SOURCE, country.trim(), region.trim())),
		None => Err(Error::Config(format!("COVID_ENTITIES: expected country/region, got {:?}", e))),
	    })
	    .collect::<Result<Vec<_>>>()?;

	let config = Self {
	    cache_dir: path("COVID_CACHE_DIR", "cache"),
	    output_dir: path("COVID_OUTPUT_DIR", "graphs"),
	    r_table: path("COVID_R_TABLE", "R_table.dict"),
	    correct_weeks: number(&lookup, "COVID_CORRECT_WEEKS", 6)?,
	    spline_smoothing: number(&lookup, "COVID_SPLINE_S", 1.0)?,
	    spline_degree: number(&lookup, "COVID_SPLINE_K", 5)?,
	    generation_interval: number(&lookup, "COVID_GENERATION", 4.0)?,
	    entities,
	};

	if !(config.generation_interval > 0.0) {
	    return Err(Error::Config("COVID_GENERATION must be positive".to_string()));
	}

	Ok(config)

    }

}

fn number<F,T>(lookup: &F, name: &str, default: T) -> Result<T>
where F: Fn(&str) -> Option<String>, T: FromStr {
    match lookup(name) {
	None => Ok(default),
	Some(val) => val.trim().parse().map_err(
	    |_| Error::Config(format!("{}: invalid value {:?}", name, val))),
    }
}
