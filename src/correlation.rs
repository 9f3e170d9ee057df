//! Lag and ratio estimation between two daily count series.
//!
//! For every candidate shift the death series is moved back in time and
//! compared day by day with the infection series on a log scale. The mean
//! log-difference gives the ratio, its spread tells how well the shift fits.

use serde::{Serialize,Deserialize};

use super::error::{Result,Error};


/// Minima larger than this factor times the smallest one are dropped.
const LIMFACTOR : f64 = 1.5;

#[derive(Clone,Debug)]
pub struct CorrelationOptions {
    /// Days with counts at or below this are ignored.
    pub limit: f64,
    pub min_samples: usize,
    /// Number of shifts tried. Death reports past this day are also
    /// ignored; a heuristic horizon, not a derived one.
    pub max_shift: usize,
}

impl Default for CorrelationOptions {
    fn default() -> Self {
	Self { limit: 1.0, min_samples: 10, max_shift: 100 }
    }
}


/// All-zero rows are sentinels: "no estimate", never a ratio of 0.
#[derive(Serialize,Deserialize,Clone,Copy,Debug,Default,PartialEq)]
pub struct CorrelationRow {
    pub ratio_estimate: f64,
    pub std: f64,
    pub variance: f64,
    pub sample_count: usize,
}

impl CorrelationRow {
    pub fn is_estimated(&self) -> bool {
	self.sample_count > 0
    }

    /// Inverse of the ratio estimate: infections per death.
    pub fn cases_per_death(&self) -> f64 {
	match self.is_estimated() {
	    true => 1.0 / self.ratio_estimate,
	    false => 0.0,
	}
    }
}

#[derive(Serialize,Deserialize,Clone,Debug,Default,PartialEq)]
pub struct CorrelationResult {
    pub rows: Vec<CorrelationRow>,
}

impl CorrelationResult {

    pub fn get(&self, shift: usize) -> Option<&CorrelationRow> {
	self.rows.get(shift).filter(|row| row.is_estimated())
    }

    pub fn ratios(&self) -> Vec<f64> {
	self.rows.iter().map(|row| row.ratio_estimate).collect()
    }

    pub fn stds(&self) -> Vec<f64> {
	self.rows.iter().map(|row| row.std).collect()
    }

    /// Largest shift that has an estimate, 0 if there is none.
    pub fn estimated_len(&self) -> usize {
	self.rows.iter().rposition(|row| row.ratio_estimate > 0.0).unwrap_or(0)
    }

    /// Shifts at local minima of the dispersion, best first.
    pub fn likely_shifts(&self) -> Vec<(usize,f64)> {
	find_mins(&self.stds())
    }

    /// The most likely shift that has an estimate, with its row.
    pub fn best_shift(&self) -> Option<(usize,&CorrelationRow)> {
	self.likely_shifts().first()
	    .and_then(|(shift,_)| self.get(*shift).map(|row| (*shift, row)))
    }

}


pub fn estimate(infections: &[f64], deaths: &[f64],
		options: &CorrelationOptions) -> Result<CorrelationResult> {

    if infections.len() != deaths.len() {
	return Err(Error::LengthMismatch {
	    what: "infections/deaths", left: infections.len(), right: deaths.len()
	});
    }

    let len = deaths.len();
    let mut deaths = deaths.to_vec();
    for d in deaths.iter_mut().skip(options.max_shift) {
	*d = 0.0;
    }

    let rows = (0..options.max_shift).map(|shift| {

	let diff : Vec<f64> = infections.iter().enumerate().filter_map(|(i,inf)| {
	    let death = if i + shift < len { deaths[i + shift] } else { 0.0 };
	    match *inf > options.limit && death > options.limit {
		true => Some(inf.ln() - death.ln()),
		false => None,
	    }
	}).collect();

	let n = diff.len() as f64;
	let mean = diff.iter().sum::<f64>() / n;
	let variance = diff.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
	let std = variance.sqrt();

	match diff.len() > options.min_samples
	    && mean.is_finite() && std.is_finite() && variance.is_finite() {
	    true => CorrelationRow {
		ratio_estimate: (-mean).exp(),
		std, variance,
		sample_count: diff.len(),
	    },
	    false => CorrelationRow::default(),
	}

    }).collect();

    Ok(CorrelationResult { rows })

}


/// Local minima of a series as (index, value), sorted by value and limited
/// to those within `LIMFACTOR` of the smallest. Zeros are not minima.
pub fn find_mins(values: &[f64]) -> Vec<(usize,f64)> {

    let mut mins = Vec::new();
    let mut rising = true;
    let mut prev = match values.first() {
	Some(v) => *v,
	None => return mins,
    };

    for (i,val) in values.iter().enumerate().skip(1) {
	if *val > prev {
	    if !rising && prev != 0.0 {
		mins.push((i - 1, prev));
	    }
	    rising = true;
	} else if *val > 0.0 {
	    rising = false;
	}
	prev = *val;
    }

    mins.sort_by(|a,b| a.1.total_cmp(&b.1));
    if let Some(&(_,lowest)) = mins.first() {
	mins.retain(|(_,v)| *v < LIMFACTOR * lowest);
    }
    mins

}


#[cfg(test)]
mod tests {

    use super::*;

    fn doubling(len: usize) -> Vec<f64> {
	(0..len).map(|i| if i < 2 { 0.0 } else { 2f64.powi(i as i32 - 2) }).collect()
    }

    #[test]
    fn recovers_shift_and_ratio_of_doubling_series() {
	let infections = doubling(40);
	let deaths : Vec<f64> = (0..40).map(
	    |i| if i < 5 { 0.0 } else { 0.02 * infections[i - 5] }
	).collect();
	let result = estimate(&infections, &deaths, &CorrelationOptions::default()).unwrap();
	assert_eq!(result.rows.len(), 100);

	let row = result.get(5).unwrap();
	assert!((row.ratio_estimate - 0.02).abs() < 1e-9);
	assert!((row.cases_per_death() - 50.0).abs() < 1e-6);
	assert!(row.std < 1e-9);
	// deaths exceed 1 from 0.02 * 2^6 onward, i.e. infections day 8..=34
	assert_eq!(row.sample_count, 27);

	// a pure doubling series fits every shift without dispersion, only
	// the ratio tells the true lag apart
	let row = result.get(4).unwrap();
	assert!((row.ratio_estimate - 0.01).abs() < 1e-9);
    }

    #[test]
    fn recovers_lag_in_weekly_series() {
	let len = 200;
	let infections : Vec<f64> = (0..len).map(
	    |i| 1000.0 * (1.0 + 0.5 * (i as f64 / 15.0).sin())
		* (1.0 + 0.2 * ((i % 7) as f64 - 3.0) / 3.0)
	).collect();
	let deaths : Vec<f64> = (0..len).map(
	    |i| match i < 12 {
		true => 0.0,
		false => 0.05 * infections[i - 12]
		    * (1.0 + 0.01 * (((i * 37) % 13) as f64 - 6.0) / 6.0),
	    }
	).collect();
	let options = CorrelationOptions { max_shift: 30, ..Default::default() };
	let result = estimate(&infections, &deaths, &options).unwrap();

	let best = result.rows.iter().enumerate()
	    .filter(|(_,r)| r.is_estimated())
	    .min_by(|a,b| a.1.std.total_cmp(&b.1.std))
	    .map(|(s,_)| s).unwrap();
	assert_eq!(best, 12);
	// deaths past day 30 are cut off
	assert_eq!(result.rows[12].sample_count, 18);
	assert!((result.rows[12].ratio_estimate - 0.05).abs() < 1e-3);
	assert_eq!(result.likely_shifts()[0].0, 12);
	let (shift,row) = result.best_shift().unwrap();
	assert_eq!(shift, 12);
	assert_eq!(row, &result.rows[12]);
	let ratios = result.ratios();
	assert_eq!(ratios.len(), 30);
	assert_eq!(ratios[12], result.rows[12].ratio_estimate);
	assert_eq!(result.stds()[12], result.rows[12].std);
    }

    #[test]
    fn late_deaths_are_ignored() {
	let infections = vec![10.0; 150];
	let mut deaths = vec![0.0; 150];
	for d in deaths.iter_mut().skip(100) {
	    *d = 5.0;
	}
	let result = estimate(&infections, &deaths, &CorrelationOptions::default()).unwrap();
	assert!(result.rows.iter().all(|r| *r == CorrelationRow::default()));
	assert_eq!(result.estimated_len(), 0);
	assert!(result.best_shift().is_none());
	assert!(result.ratios().iter().all(|r| *r == 0.0));
	// the caller's series is untouched
	assert_eq!(deaths[120], 5.0);
    }

    #[test]
    fn sparse_series_yield_sentinels() {
	let infections = vec![0.0, 5.0, 0.0, 5.0, 0.0, 5.0];
	let deaths = vec![2.0; 6];
	let result = estimate(&infections, &deaths, &CorrelationOptions::default()).unwrap();
	assert!(result.rows.iter().all(|r| !r.is_estimated()));
	assert!(result.get(0).is_none());
    }

    #[test]
    fn sample_count_must_exceed_minimum() {
	// deaths past day 10 are cut off, leaving ten qualifying days at shift 0
	let infections = vec![4.0; 20];
	let deaths = vec![2.0; 20];
	let options = CorrelationOptions { max_shift: 10, ..Default::default() };
	let result = estimate(&infections, &deaths, &options).unwrap();
	assert!(!result.rows[0].is_estimated());
	let options = CorrelationOptions { max_shift: 10, min_samples: 9, ..Default::default() };
	let result = estimate(&infections, &deaths, &options).unwrap();
	assert_eq!(result.rows[0].sample_count, 10);
	assert!((result.rows[0].ratio_estimate - 0.5).abs() < 1e-12);
	assert!(!result.rows[1].is_estimated());
	assert_eq!(result.estimated_len(), 0);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
	let err = estimate(&[1.0, 2.0], &[1.0], &CorrelationOptions::default());
	assert!(matches!(err, Err(Error::LengthMismatch { .. })));
    }

    #[test]
    fn minima_are_sorted_and_limited() {
	let values = [5.0, 3.0, 4.0, 0.0, 0.0, 2.0, 6.0, 2.5, 7.0, 9.0, 2.0, 8.0];
	assert_eq!(find_mins(&values), vec![(10, 2.0), (7, 2.5)]);
	assert!(find_mins(&[]).is_empty());
	assert!(find_mins(&[1.0, 2.0, 3.0]).is_empty());
    }

}
