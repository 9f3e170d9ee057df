//! Removal of weekly reporting artifacts.
//!
//! The log of the series is smoothed with a spline; per-weekday medians of
//! the residuals estimate the weekly reporting bias, either once for the
//! whole series or in a window sliding along it.

use log::{debug,warn};

use super::error::{Result,Error};
use super::spline::SmoothingSpline;


/// Stand-in for zero and negative counts before taking the log.
const FLOOR : f64 = 0.1;
/// Below this many points the spline is fitted on the daily data.
const MIN_WEEKLY_POINTS : usize = 40;
const DIRECT_SMOOTHING : f64 = 20.0;
const DIRECT_DEGREE : usize = 5;


#[derive(Clone,Debug)]
pub struct WeeklyOptions {
    pub correct_weeks: usize,
    pub spline_smoothing: f64,
    pub spline_degree: usize,
}

impl Default for WeeklyOptions {
    fn default() -> Self {
	Self { correct_weeks: 6, spline_smoothing: 1.0, spline_degree: 5 }
    }
}


/// How the per-day correction is derived from the residuals.
#[derive(Clone,Copy,Debug,PartialEq)]
pub enum CorrectionMode {
    /// One median per weekday over the whole series.
    Global,
    /// Medians per weekday within `window` days around each day.
    Local { window: usize },
}

impl CorrectionMode {

    pub fn select(len: usize, correct_weeks: usize) -> Self {
	let window = 7 * correct_weeks;
	match len < 3 * window || window == 0 {
	    true => Self::Global,
	    false => Self::Local { window },
	}
    }

    /// Correction per day plus the last per-weekday median table used.
    pub fn correction(&self, residuals: &[f64], labels: &[Option<u8>]) -> (Vec<f64>,[f64;7]) {
	match *self {
	    Self::Global => global_correction(residuals, labels),
	    Self::Local { window } => local_correction(residuals, labels, window),
	}
    }

}


#[derive(Clone,Debug)]
pub struct DeseasonalizationResult {
    /// Days starting at the first positive value.
    pub time_axis: Vec<f64>,
    pub log_raw: Vec<f64>,
    pub log_corrected: Vec<f64>,
    pub correction: Vec<f64>,
    pub weekday_labels: Vec<Option<u8>>,
    pub weekday_residuals: [f64;7],
    pub residuals: Vec<f64>,
    pub log_spline: Vec<f64>,
    pub spline: Option<SmoothingSpline>,
    pub mode: CorrectionMode,
}

impl DeseasonalizationResult {

    fn empty() -> Self {
	Self {
	    time_axis: vec![], log_raw: vec![], log_corrected: vec![],
	    correction: vec![], weekday_labels: vec![], weekday_residuals: [0.0; 7],
	    residuals: vec![], log_spline: vec![], spline: None,
	    mode: CorrectionMode::Global,
	}
    }

    pub fn len(&self) -> usize {
	self.time_axis.len()
    }

    pub fn is_empty(&self) -> bool {
	self.time_axis.is_empty()
    }

    pub fn corrected(&self) -> Vec<f64> {
	self.log_corrected.iter().map(|v| v.exp()).collect()
    }

    /// Corrected counts on an untrimmed axis of `len` days, zero before the
    /// first observation.
    pub fn padded_corrected(&self, len: usize) -> Vec<f64> {
	let lead = len.saturating_sub(self.len());
	std::iter::repeat(0.0).take(lead)
	    .chain(self.corrected().into_iter())
	    .take(len)
	    .collect()
    }

}


pub fn deseasonalize(time_axis: &[f64], values: &[f64], weekday_labels: &[Option<u8>],
		     options: &WeeklyOptions) -> Result<DeseasonalizationResult> {

    if time_axis.len() != values.len() {
	return Err(Error::LengthMismatch {
	    what: "time axis/values", left: time_axis.len(), right: values.len()
	});
    }
    if values.len() != weekday_labels.len() {
	return Err(Error::LengthMismatch {
	    what: "values/weekdays", left: values.len(), right: weekday_labels.len()
	});
    }

    let start = match values.iter().position(|v| *v > 0.0) {
	Some(start) => start,
	None => return Ok(DeseasonalizationResult::empty()),
    };

    let time = time_axis[start..].to_vec();
    let labels = weekday_labels[start..].to_vec();
    let log_raw : Vec<f64> = values[start..].iter()
	.map(|v| if *v > 0.0 { v.ln() } else { FLOOR.ln() })
	.collect();

    let (log_spline,spline) = match fit_trend(&time, &log_raw, options) {
	Trend::Spline(spline) => (spline.evaluate_all(&time), Some(spline)),
	Trend::Constant(level) => (vec![level; time.len()], None),
    };
    let residuals : Vec<f64> = log_raw.iter().zip(log_spline.iter())
	.map(|(raw,smooth)| raw - smooth)
	.collect();

    let mode = CorrectionMode::select(time.len(), options.correct_weeks);
    debug!("weekly correction over {} days: {:?}", time.len(), mode);
    let (correction,weekday_residuals) = mode.correction(&residuals, &labels);

    let corrected : Vec<f64> = log_raw.iter().zip(correction.iter())
	.map(|(raw,corr)| (raw - corr).exp())
	.collect();
    let log_corrected = moving_average3(&corrected).into_iter().map(|v| v.ln()).collect();

    Ok(DeseasonalizationResult {
	time_axis: time, log_raw, log_corrected, correction,
	weekday_labels: labels, weekday_residuals, residuals,
	log_spline, spline, mode,
    })

}


enum Trend {
    Spline(SmoothingSpline),
    Constant(f64),
}

fn fit_trend(time: &[f64], log_values: &[f64], options: &WeeklyOptions) -> Trend {

    if time.len() < MIN_WEEKLY_POINTS {
	return direct_trend(time, log_values);
    }

    // one point per week, the log of the weekly mean, to damp the
    // weekly pattern before fitting
    let (weekly_time,weekly_log) : (Vec<f64>,Vec<f64>) = (3..time.len() - 3).step_by(7)
	.map(|i| {
	    let mean = log_values[i-3..i+4].iter().map(|v| v.exp()).sum::<f64>() / 7.0;
	    (time[i], mean.ln())
	}).unzip();

    match SmoothingSpline::fit(&weekly_time, &weekly_log,
			       options.spline_smoothing, options.spline_degree) {
	Ok(spline) => Trend::Spline(spline),
	Err(err) => {
	    debug!("weekly spline failed ({}), fitting daily values", err);
	    direct_trend(time, log_values)
	}
    }

}

fn direct_trend(time: &[f64], log_values: &[f64]) -> Trend {
    match SmoothingSpline::fit(time, log_values, DIRECT_SMOOTHING, DIRECT_DEGREE) {
	Ok(spline) => Trend::Spline(spline),
	Err(err) => {
	    let degree = time.len().saturating_sub(1).min(DIRECT_DEGREE);
	    warn!("daily spline failed ({}), lowering degree to {}", err, degree);
	    match SmoothingSpline::fit(time, log_values, DIRECT_SMOOTHING, degree) {
		Ok(spline) => Trend::Spline(spline),
		Err(_) => Trend::Constant(
		    log_values.iter().sum::<f64>() / log_values.len().max(1) as f64
		),
	    }
	}
    }
}


/// Median per weekday; weekdays without residuals get 0.
fn weekday_medians(residuals: &[f64], labels: &[Option<u8>]) -> [f64;7] {
    let mut table = [0.0; 7];
    for (day,entry) in table.iter_mut().enumerate() {
	let mut values : Vec<f64> = residuals.iter().zip(labels.iter())
	    .filter(|(_,label)| **label == Some(day as u8))
	    .map(|(res,_)| *res)
	    .collect();
	*entry = median(&mut values).unwrap_or(0.0);
    }
    table
}

fn lookup(table: &[f64;7], label: Option<u8>) -> f64 {
    label.and_then(|day| table.get(day as usize).cloned()).unwrap_or(0.0)
}

pub fn global_correction(residuals: &[f64], labels: &[Option<u8>]) -> (Vec<f64>,[f64;7]) {
    let table = weekday_medians(residuals, labels);
    (labels.iter().map(|label| lookup(&table, *label)).collect(), table)
}

/// The first and last `window` days use the medians of their own window;
/// days further inside use the medians of `[i - window/2, i + window/2)`.
pub fn local_correction(residuals: &[f64], labels: &[Option<u8>],
			window: usize) -> (Vec<f64>,[f64;7]) {

    let len = residuals.len();
    let window = window.min(len);
    let mut correction = vec![0.0; len];

    let head = weekday_medians(&residuals[..window], &labels[..window]);
    for i in 0..window {
	correction[i] = lookup(&head, labels[i]);
    }

    let tail = weekday_medians(&residuals[len - window..], &labels[len - window..]);
    for i in len - window..len {
	correction[i] = lookup(&tail, labels[i]);
    }

    let half = window / 2;
    for i in half..len.saturating_sub(half) {
	correction[i] = match labels[i] {
	    None => 0.0,
	    Some(day) => {
		let mut values : Vec<f64> = residuals[i - half..i + half].iter()
		    .zip(labels[i - half..i + half].iter())
		    .filter(|(_,label)| **label == Some(day))
		    .map(|(res,_)| *res)
		    .collect();
		median(&mut values).unwrap_or(0.0)
	    }
	};
    }

    (correction, tail)

}


fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
	return None;
    }
    values.sort_by(|a,b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(match values.len() % 2 {
	0 => (values[mid - 1] + values[mid]) / 2.0,
	_ => values[mid],
    })
}

/// Centred three-point mean, edges replicated.
fn moving_average3(values: &[f64]) -> Vec<f64> {
    let len = values.len();
    (0..len).map(|i| {
	let prev = values[i.saturating_sub(1)];
	let next = values[(i + 1).min(len - 1)];
	(prev + values[i] + next) / 3.0
    }).collect()
}


#[cfg(test)]
mod tests {

    use super::*;

    const OFFSETS : [f64;7] = [0.2, 0.1, 0.05, 0.0, -0.05, -0.3, 0.0];

    fn labels(len: usize, first: u8) -> Vec<Option<u8>> {
	(0..len).map(|i| Some(((i as u8 % 7) + first) % 7)).collect()
    }

    fn weekly_series(len: usize) -> (Vec<f64>,Vec<f64>,Vec<Option<u8>>) {
	let time : Vec<f64> = (0..len).map(|i| i as f64).collect();
	let labels = labels(len, 2);
	let values = time.iter().zip(labels.iter()).map(|(t,day)| {
	    (5.0 + 0.02 * t - 0.0001 * t * t + OFFSETS[day.unwrap() as usize]).exp()
	}).collect();
	(time, values, labels)
    }

    #[test]
    fn rejects_mismatched_inputs() {
	let err = deseasonalize(&[0.0, 1.0], &[1.0], &[Some(0)], &WeeklyOptions::default());
	assert!(matches!(err, Err(Error::LengthMismatch { .. })));
	let err = deseasonalize(&[0.0, 1.0], &[1.0, 2.0], &[Some(0)], &WeeklyOptions::default());
	assert!(matches!(err, Err(Error::LengthMismatch { .. })));
    }

    #[test]
    fn all_zero_series_gives_empty_result() {
	let result = deseasonalize(&[0.0, 1.0, 2.0], &[0.0; 3], &labels(3, 0),
				   &WeeklyOptions::default()).unwrap();
	assert!(result.is_empty());
	assert_eq!(result.padded_corrected(3), vec![0.0; 3]);
    }

    #[test]
    fn leading_zeros_are_trimmed_and_gaps_floored() {
	let (time,mut values,labels) = weekly_series(30);
	for v in values.iter_mut().take(4) {
	    *v = 0.0;
	}
	values[10] = 0.0;
	let result = deseasonalize(&time, &values, &labels, &WeeklyOptions::default()).unwrap();
	assert_eq!(result.len(), 26);
	assert_eq!(result.time_axis[0], 4.0);
	assert_eq!(result.weekday_labels[0], labels[4]);
	assert!((result.log_raw[6] - FLOOR.ln()).abs() < 1e-12);
	for v in [&result.log_corrected, &result.correction, &result.residuals, &result.log_spline].iter() {
	    assert_eq!(v.len(), 26);
	}
	assert_eq!(result.mode, CorrectionMode::Global);
	let padded = result.padded_corrected(30);
	assert_eq!(&padded[..4], &[0.0; 4]);
	assert!(padded[4] > 0.0);
    }

    #[test]
    fn removes_weekly_pattern_globally() {
	let (time,values,labels) = weekly_series(100);
	let result = deseasonalize(&time, &values, &labels, &WeeklyOptions::default()).unwrap();
	assert_eq!(result.mode, CorrectionMode::Global);
	// the correction reproduces the weekly offsets up to a common level
	let level = result.weekday_residuals[3];
	for (day,offset) in OFFSETS.iter().enumerate() {
	    assert!((result.weekday_residuals[day] - level - offset).abs() < 0.03,
		    "weekday {}: {:?}", day, result.weekday_residuals);
	}
	// and the corrected curve is smooth
	let jumps = result.log_corrected.windows(3)
	    .map(|w| (w[0] - 2.0 * w[1] + w[2]).abs())
	    .fold(0.0, f64::max);
	assert!(jumps < 0.02, "largest second difference {}", jumps);
    }

    #[test]
    fn second_pass_finds_little_left_to_correct() {
	let (time,values,labels) = weekly_series(140);
	let options = WeeklyOptions { spline_smoothing: 0.0, ..Default::default() };
	let first = deseasonalize(&time, &values, &labels, &options).unwrap();
	assert_eq!(first.mode, CorrectionMode::Local { window: 42 });
	assert!(first.correction.iter().any(|c| c.abs() > 0.15));

	let second = deseasonalize(&first.time_axis, &first.corrected(),
				   &first.weekday_labels, &options).unwrap();
	let largest = second.correction.iter().fold(0.0f64, |m,c| m.max(c.abs()));
	assert!(largest < 0.03, "largest remaining correction {}", largest);
    }

    #[test]
    fn local_correction_follows_a_changing_bias() {
	let len = 300;
	let labels = labels(len, 0);
	let residuals : Vec<f64> = labels.iter().enumerate()
	    .map(|(i,day)| match (*day, i < 150) {
		(Some(0), true) => 0.4,
		(Some(0), false) => -0.4,
		_ => 0.0,
	    })
	    .collect();
	let (local,tail) = local_correction(&residuals, &labels, 42);
	assert_eq!(local[70], 0.4);
	assert_eq!(local[231], -0.4);
	assert_eq!(local[71], 0.0);
	assert_eq!(tail[0], -0.4);
	// one table for the whole series cannot follow the change
	let (global,_) = global_correction(&residuals, &labels);
	assert_eq!(global[70], global[231]);
    }

    #[test]
    fn local_and_global_agree_on_stationary_pattern() {
	let len = 126;
	let labels = labels(len, 4);
	let residuals : Vec<f64> = labels.iter().enumerate()
	    .map(|(i,day)| OFFSETS[day.unwrap() as usize] + 0.001 * ((i * 13) % 5) as f64)
	    .collect();
	let (global,_) = global_correction(&residuals, &labels);
	let (local,_) = local_correction(&residuals, &labels, 42);
	for (g,l) in global.iter().zip(local.iter()) {
	    assert!((g - l).abs() < 0.005);
	}

	let short = &residuals[..60];
	let (global,table) = CorrectionMode::select(60, 6).correction(short, &labels[..60]);
	let (local,_) = CorrectionMode::Local { window: 60 }.correction(short, &labels[..60]);
	assert_eq!(global.len(), 60);
	for (g,l) in global.iter().zip(local.iter()) {
	    assert!((g - l).abs() < 0.005);
	}
	assert!((table[5] - OFFSETS[5]).abs() < 0.005);
    }

    #[test]
    fn unknown_weekdays_are_not_corrected() {
	let mut labels = labels(21, 0);
	labels[5] = None;
	let residuals = vec![0.5; 21];
	let (correction,table) = global_correction(&residuals, &labels);
	assert_eq!(correction[5], 0.0);
	assert_eq!(correction[4], 0.5);
	assert_eq!(table, [0.5; 7]);
    }

    #[test]
    fn short_weekly_fit_falls_back_to_daily_fit() {
	// 41 days give only five weekly points, too few for degree 5
	let (time,values,labels) = weekly_series(41);
	let result = deseasonalize(&time, &values, &labels, &WeeklyOptions::default()).unwrap();
	let spline = result.spline.as_ref().unwrap();
	assert_eq!(spline.degree(), 5);
	assert!(spline.residual() <= 20.0 * 1.01);
	assert_eq!(result.len(), 41);
    }

    #[test]
    fn tiny_series_still_produce_a_trend() {
	let result = deseasonalize(&[0.0, 1.0, 2.0], &[3.0, 4.0, 5.0], &labels(3, 0),
				   &WeeklyOptions::default()).unwrap();
	assert_eq!(result.len(), 3);
	assert!(result.log_spline.iter().all(|v| v.is_finite()));
	let single = deseasonalize(&[0.0], &[3.0], &[Some(1)], &WeeklyOptions::default()).unwrap();
	assert!((single.log_corrected[0] - 3f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn moving_average_replicates_edges() {
	assert_eq!(moving_average3(&[3.0, 6.0, 9.0]), vec![4.0, 6.0, 8.0]);
	assert_eq!(moving_average3(&[2.0]), vec![2.0]);
    }

}
