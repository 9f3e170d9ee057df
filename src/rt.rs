//! Piecewise-constant reproduction number and the infection curve it implies.
//!
//! Breakpoints are edited per entity as literal lists `[(day, R), ...]` and
//! kept in a small text table, one entity per line.

use std::fs;
use std::fs::File;
use std::io::{BufRead,BufReader,BufWriter,Write};
use std::path::Path;
use std::collections::{BTreeMap,HashMap};
use std::iter::Peekable;
use std::str::Chars;

use lazy_static::lazy_static;
use log::{info,warn};

use super::error::{Result,Error};
use super::series::EntityKey;


/// Output resolution of the curves, in points per day.
const OUTPUT_STEPS : usize = 10;
/// Days added after the last observed day.
const X_MAX_MARGIN : usize = 5;

lazy_static! {
    static ref DEFAULT_ENTITY : EntityKey = EntityKey::new("JHU_GL", "Germany", "Germany");
}

const DEFAULT_BREAKPOINTS : [(f64,f64);15] = [
    (0.0, 1.0), (25.0, 2.7), (57.0, 1.4), (64.0, 1.05), (71.0, 0.8),
    (100.0, 0.85), (141.0, 1.8), (149.0, 0.85), (168.0, 1.15), (212.0, 0.9),
    (221.0, 1.1), (255.0, 1.33), (284.0, 0.98), (312.0, 1.1), (325.0, 1.02)
];


#[derive(Clone,Copy,Debug,PartialEq)]
pub struct Breakpoint {
    pub day: f64,
    pub r: f64,
}

#[derive(Clone,Debug)]
pub struct RtOptions {
    /// Days per generation.
    pub generation_interval: f64,
    pub integration_steps_per_day: usize,
}

impl Default for RtOptions {
    fn default() -> Self {
	Self { generation_interval: 4.0, integration_steps_per_day: 100 }
    }
}

#[derive(Clone,Debug,PartialEq)]
pub struct RCurveResult {
    pub time_axis: Vec<f64>,
    pub r_values: Vec<f64>,
    pub infections: Vec<f64>,
    /// False for the flat stand-in of entities without breakpoints.
    pub valid: bool,
}


/// Parse `[(day, R), (day, R), ...]`; the brackets may be left out.
pub fn parse_breakpoints(text: &str) -> Result<Vec<Breakpoint>> {

    let mut chars = text.chars().peekable();
    skip_ws(&mut chars);
    let bracketed = chars.peek() == Some(&'[');
    if bracketed {
	chars.next();
    }

    let mut breakpoints = Vec::new();
    loop {
	skip_ws(&mut chars);
	match chars.peek() {
	    Some('(') => { chars.next(); }
	    Some(']') if bracketed => break,
	    None if !bracketed => break,
	    other => return Err(parse_error(format!("expected '(' but found {:?}", other))),
	}
	let day = number(&mut chars)?;
	expect(&mut chars, ',')?;
	let r = number(&mut chars)?;
	expect(&mut chars, ')')?;
	breakpoints.push(Breakpoint { day, r });

	skip_ws(&mut chars);
	match chars.peek() {
	    Some(',') => { chars.next(); }
	    Some(']') if bracketed => break,
	    None if !bracketed => break,
	    other => return Err(parse_error(format!("expected ',' but found {:?}", other))),
	}
    }
    if bracketed {
	expect(&mut chars, ']')?;
    }
    skip_ws(&mut chars);
    if let Some(c) = chars.next() {
	return Err(parse_error(format!("trailing input at {:?}", c)));
    }

    if breakpoints.is_empty() {
	return Err(parse_error("no breakpoints".to_string()));
    }
    if let Some(bp) = breakpoints.iter().find(|bp| !(bp.r > 0.0) || !bp.r.is_finite()) {
	return Err(parse_error(format!("R must be positive, got {}", bp.r)));
    }
    if breakpoints.windows(2).any(|w| w[1].day <= w[0].day) {
	return Err(parse_error("days must be strictly increasing".to_string()));
    }

    Ok(breakpoints)

}

pub fn format_breakpoints(breakpoints: &[Breakpoint]) -> String {
    format!("[{}]", breakpoints.iter()
	    .map(|bp| format!("({}, {})", bp.day, bp.r))
	    .collect::<Vec<_>>().join(", "))
}

fn parse_error(msg: String) -> Error {
    Error::BreakpointParse(msg)
}

fn skip_ws(chars: &mut Peekable<Chars>) {
    while chars.peek().map_or(false, |c| c.is_whitespace()) {
	chars.next();
    }
}

fn expect(chars: &mut Peekable<Chars>, c: char) -> Result<()> {
    skip_ws(chars);
    match chars.next() {
	Some(found) if found == c => Ok(()),
	found => Err(parse_error(format!("expected {:?} but found {:?}", c, found))),
    }
}

fn number(chars: &mut Peekable<Chars>) -> Result<f64> {
    skip_ws(chars);
    let mut literal = String::new();
    while let Some(c) = chars.peek().filter(|c| c.is_ascii_digit() || "+-.eE".contains(**c)) {
	literal.push(*c);
	chars.next();
    }
    literal.parse::<f64>()
	.map_err(|_| parse_error(format!("invalid number {:?}", literal)))
}


/// Number of points of `1, 1 + 1/steps, ...` below `x_max`.
fn axis_len(x_max: f64, steps: usize) -> usize {
    let span = (x_max - 1.0) * steps as f64;
    match span > 0.0 {
	false => 0,
	true => match (span - span.round()).abs() < 1e-9 {
	    true => span.round() as usize,
	    false => span.ceil() as usize,
	}
    }
}

/// R of the latest breakpoint at or before `t`; the first one also
/// covers the time before it.
fn r_at(breakpoints: &[Breakpoint], t: f64) -> f64 {
    breakpoints.iter().rev()
	.find(|bp| bp.day <= t)
	.or_else(|| breakpoints.first())
	.map_or(1.0, |bp| bp.r)
}

pub fn compute_curve(breakpoints: &[Breakpoint], x_max: f64, options: &RtOptions) -> RCurveResult {

    let steps = options.integration_steps_per_day.max(1);
    let fine : Vec<f64> = (0..axis_len(x_max, steps))
	.map(|i| 1.0 + i as f64 / steps as f64)
	.collect();
    let r_fine : Vec<f64> = fine.iter().map(|t| r_at(breakpoints, *t)).collect();
    let growth : Vec<f64> = r_fine.iter()
	.map(|r| r.ln() / options.generation_interval)
	.collect();

    // trapezoidal integral of the growth rate, starting at 0
    let mut log_infections = Vec::with_capacity(fine.len());
    let mut sum = 0.0;
    for i in 0..fine.len() {
	if i > 0 {
	    sum += (growth[i] + growth[i-1]) / 2.0 * (fine[i] - fine[i-1]);
	}
	log_infections.push(sum);
    }

    let len = axis_len(x_max, OUTPUT_STEPS);
    let index = |j: usize| (j * steps / OUTPUT_STEPS).min(fine.len().saturating_sub(1));
    RCurveResult {
	time_axis: (0..len).map(|j| 1.0 + j as f64 / OUTPUT_STEPS as f64).collect(),
	r_values: (0..len).map(|j| r_fine[index(j)]).collect(),
	infections: (0..len).map(|j| log_infections[index(j)].exp()).collect(),
	valid: true,
    }

}

pub fn dummy_curve(x_max: f64) -> RCurveResult {
    let len = axis_len(x_max, OUTPUT_STEPS);
    RCurveResult {
	time_axis: (0..len).map(|j| 1.0 + j as f64 / OUTPUT_STEPS as f64).collect(),
	r_values: vec![1.0; len],
	infections: vec![1.0; len],
	valid: false,
    }
}


/// Breakpoint table with curves cached per (entity, x_max).
pub struct RModel {
    table: BTreeMap<EntityKey,Vec<Breakpoint>>,
    options: RtOptions,
    cache: HashMap<(EntityKey,u64),RCurveResult>,
}

impl RModel {

    pub fn new(options: RtOptions) -> Self {
	Self { table: BTreeMap::new(), options, cache: HashMap::new() }
    }

    /// Read the table at `path`, creating it with the default entry if it
    /// does not exist yet. Lines that do not parse are skipped.
    pub fn load(path: &Path, options: RtOptions) -> Result<Self> {

	let mut model = Self::new(options);

	if !path.exists() {
	    info!("Creating {} with default breakpoints", path.display());
	    model.table.insert(DEFAULT_ENTITY.clone(), DEFAULT_BREAKPOINTS.iter()
			       .map(|(day,r)| Breakpoint { day: *day, r: *r })
			       .collect());
	    model.save(path)?;
	    return Ok(model);
	}

	for (n,line) in BufReader::new(File::open(path)?).lines().enumerate() {
	    let line = line?;
	    if line.trim().is_empty() {
		continue;
	    }
	    let parsed = line.rsplit_once(';')
		.ok_or_else(|| parse_error("missing ';'".to_string()))
		.and_then(|(key,steps)| Ok((key.parse::<EntityKey>()?, parse_breakpoints(steps)?)));
	    match parsed {
		Ok((key,steps)) => { model.table.insert(key, steps); }
		Err(err) => warn!("{}:{}: skipping line: {}", path.display(), n + 1, err),
	    }
	}

	Ok(model)

    }

    pub fn save(&self, path: &Path) -> Result<()> {
	if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
	    fs::create_dir_all(dir)?;
	}
	let mut out = BufWriter::new(File::create(path)?);
	for (key,steps) in &self.table {
	    writeln!(out, "{}; {}", key, format_breakpoints(steps))?;
	}
	out.flush()?;
	Ok(())
    }

    pub fn breakpoints(&self, entity: &EntityKey) -> Option<&[Breakpoint]> {
	self.table.get(entity).map(|steps| steps.as_slice())
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityKey> {
	self.table.keys()
    }

    /// Replace the breakpoints of `entity`. On a parse error the previous
    /// breakpoints stay in place.
    pub fn update(&mut self, entity: &EntityKey, text: &str) -> Result<()> {
	let steps = parse_breakpoints(text)?;
	self.table.insert(entity.clone(), steps);
	self.cache.retain(|(key,_),_| key != entity);
	Ok(())
    }

    /// Curve over the observed range of an entity plus a few days.
    pub fn curve(&mut self, entity: &EntityKey, time_minmax: (usize,usize)) -> RCurveResult {
	self.curve_to(entity, (time_minmax.1 + X_MAX_MARGIN) as f64)
    }

    pub fn curve_to(&mut self, entity: &EntityKey, x_max: f64) -> RCurveResult {
	let steps = match self.table.get(entity) {
	    Some(steps) => steps,
	    None => return dummy_curve(x_max),
	};
	let options = &self.options;
	self.cache.entry((entity.clone(), x_max.to_bits()))
	    .or_insert_with(|| compute_curve(steps, x_max, options))
	    .clone()
    }

}
