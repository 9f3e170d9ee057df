//! Smoothing spline in the manner of Dierckx' FITPACK `curfit`.
//!
//! For a smoothing factor `s > 0` the knots are chosen automatically: starting
//! from a single polynomial piece, knots are added at data points inside the
//! interval with the largest residual until the least-squares spline is
//! closer than `s`. The final curve then trades closeness against the jumps of
//! its `k`th derivative so that the sum of squared residuals equals `s`.
//! With `s == 0` the spline interpolates the data.

use log::debug;
use nalgebra::{DMatrix,DVector};

use super::error::{Result,Error};


/// Relative tolerance on `fp == s`.
const TOL : f64 = 0.001;
/// Iterations of the smoothing parameter search.
const MAXIT : usize = 20;

const CON1 : f64 = 0.1;
const CON9 : f64 = 0.9;
const CON4 : f64 = 0.04;


#[derive(Clone,Debug)]
pub struct SmoothingSpline {
    knots: Vec<f64>,
    coefs: Vec<f64>,
    degree: usize,
    residual: f64,
}

struct Fit {
    coefs: Vec<f64>,
    residual: f64,
    diag: Vec<f64>,
}

/// Knot interval with the data points strictly inside it.
struct Interval {
    fpint: f64,
    begin: usize,
    count: usize,
}


impl SmoothingSpline {

    pub fn fit(x: &[f64], y: &[f64], smoothing: f64, degree: usize) -> Result<Self> {

	let k = degree;
	let m = x.len();

	if !(1..=5).contains(&k) {
	    return Err(Error::SplineFit(format!("degree {} not in 1..=5", k)));
	}
	if y.len() != m {
	    return Err(Error::LengthMismatch { what: "spline x/y", left: m, right: y.len() });
	}
	if m <= k {
	    return Err(Error::SplineFit(format!("{} points are too few for degree {}", m, k)));
	}
	if !(smoothing >= 0.0) {
	    return Err(Error::SplineFit(format!("smoothing factor {} is negative", smoothing)));
	}
	if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
	    return Err(Error::SplineFit("non-finite input".to_string()));
	}
	if x.windows(2).any(|w| w[1] < w[0]) || x[m-1] <= x[0] {
	    return Err(Error::SplineFit("x must be increasing".to_string()));
	}

	let nmin = 2 * k + 2;
	let nmax = m + k + 1;

	if smoothing == 0.0 {
	    let knots = interpolation_knots(x, k);
	    let fit = least_squares(x, y, &knots, k, None)?;
	    return Ok(Self { knots, coefs: fit.coefs, degree: k, residual: fit.residual });
	}

	let acc = TOL * smoothing;
	let mut interior : Vec<f64> = Vec::new();
	let mut knots = with_boundary(x, &interior, k);
	let mut fp0 = 0.0;
	let mut fpold = 0.0;
	let mut nplus = 0usize;
	let mut trials = 1;

	// knot placement
	let (fit,fpms) = loop {

	    let fit = least_squares(x, y, &knots, k, None)?;
	    let n = knots.len();
	    if n == nmin {
		fp0 = fit.residual;
	    }
	    let fpms = fit.residual - smoothing;

	    if fpms.abs() < acc {
		return Ok(Self { knots, coefs: fit.coefs, degree: k, residual: fit.residual });
	    }
	    if fpms < 0.0 {
		if n == nmin {
		    // the least-squares polynomial is close enough
		    return Ok(Self { knots, coefs: fit.coefs, degree: k, residual: fit.residual });
		}
		break (fit, fpms);
	    }
	    if n == nmax {
		return Ok(Self { knots, coefs: fit.coefs, degree: k, residual: fit.residual });
	    }

	    nplus = match n == nmin {
		true => 1,
		false => {
		    let mut npl1 = nplus * 2;
		    if fpold - fit.residual > acc {
			npl1 = (nplus as f64 * fpms / (fpold - fit.residual)) as usize;
		    }
		    (nplus * 2).min(npl1.max(nplus / 2).max(1))
		}
	    };
	    fpold = fit.residual;

	    let values = evaluate_with(&knots, &fit.coefs, k, x);
	    let mut intervals = residual_intervals(x, y, &values, &knots, k);
	    let before = interior.len();
	    for _ in 0..nplus {
		match add_knot(x, &mut intervals) {
		    Some(knot) => {
			let pos = interior.partition_point(|t| *t < knot);
			interior.insert(pos, knot);
		    }
		    None => break,
		}
		if interior.len() + nmin == nmax {
		    break;
		}
	    }
	    if interior.len() == before || trials == m {
		return Ok(Self { knots, coefs: fit.coefs, degree: k, residual: fit.residual });
	    }
	    trials += 1;
	    knots = match interior.len() + nmin == nmax {
		true => interpolation_knots(x, k),
		false => with_boundary(x, &interior, k),
	    };

	};

	// smoothing parameter search between the polynomial (p = 0) and the
	// least-squares spline on the final knots (p = inf)
	let disc = discontinuity_jumps(&knots, k);
	let nk1 = knots.len() - k - 1;
	let mut p1 = 0.0;
	let mut f1 = fp0 - smoothing;
	let mut p3 = -1.0;
	let mut f3 = fpms;
	let mut p = nk1 as f64 / fit.diag.iter().map(|d| d.abs()).sum::<f64>();
	let mut ich1 = false;
	let mut ich3 = false;
	let mut best = fit;

	for iter in 1..=MAXIT {

	    let fit = least_squares(x, y, &knots, k, Some((&disc, 1.0 / p)))?;
	    let fpms = fit.residual - smoothing;
	    best = fit;

	    if fpms.abs() < acc {
		break;
	    }
	    if iter == MAXIT {
		debug!("spline smoothing search did not converge (fp - s = {})", fpms);
		break;
	    }

	    let p2 = p;
	    let f2 = fpms;

	    if !ich3 {
		if f2 - f3 <= acc {
		    p3 = p2;
		    f3 = f2;
		    p *= CON4;
		    if p <= p1 {
			p = p1 * CON9 + p2 * CON1;
		    }
		    continue;
		}
		if f2 < 0.0 {
		    ich3 = true;
		}
	    }

	    if !ich1 {
		if f1 - f2 <= acc {
		    p1 = p2;
		    f1 = f2;
		    p /= CON4;
		    if p3 >= 0.0 && p >= p3 {
			p = p2 * CON1 + p3 * CON9;
		    }
		    continue;
		}
		if f2 > 0.0 {
		    ich1 = true;
		}
	    }

	    if f2 >= f1 || f2 <= f3 {
		debug!("spline smoothing search stalled (fp - s = {})", f2);
		break;
	    }

	    p = rational_step(&mut p1, &mut f1, p2, f2, &mut p3, &mut f3);

	}

	Ok(Self { knots, coefs: best.coefs, degree: k, residual: best.residual })

    }

    pub fn evaluate(&self, x: f64) -> f64 {
	value_at(&self.knots, &self.coefs, self.degree, x)
    }

    pub fn evaluate_all(&self, xs: &[f64]) -> Vec<f64> {
	xs.iter().map(|x| self.evaluate(*x)).collect()
    }

    pub fn knots(&self) -> &[f64] {
	&self.knots
    }

    pub fn degree(&self) -> usize {
	self.degree
    }

    /// Sum of squared residuals at the data points.
    pub fn residual(&self) -> f64 {
	self.residual
    }

}


fn with_boundary(x: &[f64], interior: &[f64], k: usize) -> Vec<f64> {
    let (xb,xe) = (x[0], x[x.len()-1]);
    std::iter::repeat(xb).take(k + 1)
	.chain(interior.iter().cloned())
	.chain(std::iter::repeat(xe).take(k + 1))
	.collect()
}

/// Interior knots at data points (odd degree) or between them (even degree).
fn interpolation_knots(x: &[f64], k: usize) -> Vec<f64> {
    let k3 = k / 2;
    let interior : Vec<f64> = (1..x.len() - k).map(|l| match k % 2 {
	1 => x[k3 + l],
	_ => (x[k3 + l] + x[k3 + l - 1]) / 2.0,
    }).collect();
    with_boundary(x, &interior, k)
}

/// Index `l` with `t[l] <= x < t[l+1]`, clamped to the base interval.
fn knot_interval(t: &[f64], k: usize, x: f64) -> usize {
    let nk1 = t.len() - k - 1;
    k + t[k+1..nk1].partition_point(|v| *v <= x)
}

/// The `k + 1` non-zero B-splines at `x`, for coefficients `l-k..=l`.
fn basis(t: &[f64], k: usize, l: usize, x: f64) -> Vec<f64> {
    let mut h = vec![0.0; k + 1];
    let mut hh = vec![0.0; k];
    h[0] = 1.0;
    for j in 1..=k {
	hh[..j].copy_from_slice(&h[..j]);
	h[0] = 0.0;
	for i in 1..=j {
	    let li = l + i;
	    let lj = li - j;
	    let f = hh[i-1] / (t[li] - t[lj]);
	    h[i-1] += f * (t[li] - x);
	    h[i] = f * (x - t[lj]);
	}
    }
    h
}

fn value_at(t: &[f64], c: &[f64], k: usize, x: f64) -> f64 {
    let l = knot_interval(t, k, x);
    basis(t, k, l, x).iter().enumerate()
	.map(|(j,b)| b * c[l - k + j])
	.sum()
}

fn evaluate_with(t: &[f64], c: &[f64], k: usize, xs: &[f64]) -> Vec<f64> {
    xs.iter().map(|x| value_at(t, c, k, *x)).collect()
}


/// Least-squares coefficients, optionally with penalty rows scaled by a
/// weight, plus the diagonal of the triangularised observation matrix.
fn least_squares(x: &[f64], y: &[f64], t: &[f64], k: usize,
		 penalty: Option<(&DMatrix<f64>,f64)>) -> Result<Fit> {

    let m = x.len();
    let nk1 = t.len() - k - 1;
    let extra = penalty.map_or(0, |(b,_)| b.nrows());

    let mut a = DMatrix::zeros(m + extra, nk1);
    let mut rhs = DVector::zeros(m + extra);
    for (row,(xi,yi)) in x.iter().zip(y.iter()).enumerate() {
	let l = knot_interval(t, k, *xi);
	for (j,b) in basis(t, k, l, *xi).into_iter().enumerate() {
	    a[(row, l - k + j)] = b;
	}
	rhs[row] = *yi;
    }
    if let Some((b,weight)) = penalty {
	for i in 0..b.nrows() {
	    for j in 0..nk1 {
		a[(m + i, j)] = b[(i, j)] * weight;
	    }
	}
    }

    let qr = a.clone().qr();
    let r = qr.r();
    let diag : Vec<f64> = (0..nk1).map(|i| r[(i, i)]).collect();
    let scale = diag.iter().fold(0.0f64, |s,d| s.max(d.abs()));
    let qtb = qr.q().transpose() * &rhs;

    let solved = match diag.iter().all(|d| d.abs() > 1e-12 * scale) {
	true => r.solve_upper_triangular(&qtb),
	false => None,
    };
    let coefs = match solved {
	Some(c) => c,
	None => a.svd(true, true).solve(&rhs, 1e-12)
	    .map_err(|e| Error::SplineFit(e.to_string()))?,
    };
    let coefs : Vec<f64> = coefs.iter().cloned().collect();

    let residual = x.iter().zip(y.iter())
	.map(|(xi,yi)| (yi - value_at(t, &coefs, k, *xi)).powi(2))
	.sum();

    Ok(Fit { coefs, residual, diag })

}


/// Squared residuals per knot interval; points on a knot count half to
/// either side.
fn residual_intervals(x: &[f64], y: &[f64], values: &[f64],
		      t: &[f64], k: usize) -> Vec<Interval> {

    let nk1 = t.len() - k - 1;
    let nrint = nk1 - k;
    let mut fpint = Vec::with_capacity(nrint);
    let mut fpart = 0.0;
    let mut l = k + 1;

    for it in 0..x.len() {
	let mut new = false;
	if l < nk1 && x[it] >= t[l] {
	    new = true;
	    l += 1;
	}
	let term = (y[it] - values[it]).powi(2);
	fpart += term;
	if new {
	    let store = term * 0.5;
	    fpint.push(fpart - store);
	    fpart = store;
	}
    }
    fpint.push(fpart);

    fpint.into_iter().enumerate().map(|(j,fpint)| {
	let (tl,tr) = (t[k + j], t[k + j + 1]);
	let begin = x.partition_point(|v| *v < tl);
	let count = x.iter().filter(|v| **v > tl && **v < tr).count();
	Interval { fpint, begin, count }
    }).collect()

}

/// Split the interval with the largest residual at its middle data point.
fn add_knot(x: &[f64], intervals: &mut Vec<Interval>) -> Option<f64> {

    let (number,_) = intervals.iter().enumerate()
	.filter(|(_,i)| i.count > 0)
	.fold(None, |best : Option<(usize,f64)>, (j,i)| match best {
	    Some((_,fpmax)) if fpmax >= i.fpint => best,
	    _ => Some((j, i.fpint)),
	})?;

    let Interval { fpint: fpmax, begin, count: maxpt } = intervals[number];
    let ihalf = maxpt / 2 + 1;
    let knot = x[begin + ihalf];

    let left = ihalf - 1;
    let right = maxpt - ihalf;
    intervals[number] = Interval {
	fpint: fpmax * left as f64 / maxpt as f64,
	begin,
	count: left,
    };
    intervals.insert(number + 1, Interval {
	fpint: fpmax * right as f64 / maxpt as f64,
	begin: begin + ihalf,
	count: right,
    });

    Some(knot)

}


/// Jumps of the `k`th derivative of each B-spline at the interior knots,
/// one row per knot.
fn discontinuity_jumps(t: &[f64], k: usize) -> DMatrix<f64> {

    let n = t.len();
    let k1 = k + 1;
    let nk1 = n - k1;
    let nrint = nk1 - k;
    let fac = nrint as f64 / (t[nk1] - t[k]);
    let rows = n - 2 * k1;
    let mut b = DMatrix::zeros(rows, nk1);
    let mut h = vec![0.0; 2 * k1];

    for l in k1..nk1 {
	let r = l - k1;
	for j in 0..k1 {
	    h[j] = t[l] - t[l + j - k1];
	    h[j + k1] = t[l] - t[l + j + 1];
	}
	for j in 0..=k1 {
	    let prod = (1..=k).fold(h[j], |prod,i| prod * h[j + i] * fac);
	    let c = r + j;
	    b[(r, c)] = (t[c + k1] - t[c]) / prod;
	}
    }

    b

}

/// Rational interpolation step for the root of `f(p) = 0`; `p3 < 0` stands
/// for infinity. Keeps `f1 > 0` and `f3 < 0`.
fn rational_step(p1: &mut f64, f1: &mut f64, p2: f64, f2: f64,
		 p3: &mut f64, f3: &mut f64) -> f64 {
    let p = match *p3 > 0.0 {
	false => (*p1 * (*f1 - *f3) * f2 - p2 * (f2 - *f3) * *f1) / ((*f1 - f2) * *f3),
	true => {
	    let h1 = *f1 * (f2 - *f3);
	    let h2 = f2 * (*f3 - *f1);
	    let h3 = *f3 * (*f1 - f2);
	    -(*p1 * p2 * h3 + p2 * *p3 * h1 + *p3 * *p1 * h2)
		/ (*p1 * h1 + p2 * h2 + *p3 * h3)
	}
    };
    if f2 < 0.0 {
	*p3 = p2;
	*f3 = f2;
    } else {
	*p1 = p2;
	*f1 = f2;
    }
    p
}


#[cfg(test)]
mod tests {

    use super::*;

    fn axis(m: usize) -> Vec<f64> {
	(0..m).map(|i| i as f64).collect()
    }

    #[test]
    fn interpolates_with_zero_smoothing() {
	let x = axis(15);
	let y : Vec<f64> = x.iter().map(|v| (v / 3.0).sin() + 0.1 * v).collect();
	for k in 1..=5 {
	    let spline = SmoothingSpline::fit(&x, &y, 0.0, k).unwrap();
	    assert_eq!(spline.knots().len(), 15 + k + 1);
	    for (xi,yi) in x.iter().zip(y.iter()) {
		assert!((spline.evaluate(*xi) - yi).abs() < 1e-8, "k = {}", k);
	    }
	}
    }

    #[test]
    fn reproduces_polynomials_of_its_degree() {
	let x = axis(30);
	let y : Vec<f64> = x.iter().map(|v| 0.5 + 0.2 * v - 0.01 * v * v + 0.0003 * v.powi(3)).collect();
	let spline = SmoothingSpline::fit(&x, &y, 1.0, 3).unwrap();
	// the cubic is already within s, so no interior knots are needed
	assert_eq!(spline.knots().len(), 8);
	assert!(spline.residual() < 1e-12);
	assert!((spline.evaluate(12.5) - (0.5 + 2.5 - 1.5625 + 0.0003 * 12.5f64.powi(3))).abs() < 1e-9);
    }

    #[test]
    fn smoothing_factor_bounds_the_residual() {
	let x = axis(80);
	let y : Vec<f64> = x.iter()
	    .map(|v| (v / 8.0).sin() * 3.0 + 0.3 * ((v * 7.0) % 5.0 - 2.0))
	    .collect();
	let s = 8.0;
	let spline = SmoothingSpline::fit(&x, &y, s, 3).unwrap();
	assert!(spline.residual() <= s * 1.05, "fp = {}", spline.residual());
	assert!(spline.residual() > s * 0.5, "fp = {}", spline.residual());
	assert!(spline.knots().len() > 8);
	assert!(spline.knots().len() < 80 + 4);
	// the smooth part is followed, most of the noise is not
	let deviation = x.iter()
	    .map(|v| (spline.evaluate(*v) - 3.0 * (v / 8.0).sin()).abs())
	    .sum::<f64>() / 80.0;
	assert!(deviation < 0.3, "mean deviation {}", deviation);
    }

    #[test]
    fn rejects_what_curfit_rejects() {
	let x = axis(5);
	let y = vec![1.0; 5];
	assert!(SmoothingSpline::fit(&x, &y, 1.0, 5).is_err());
	assert!(SmoothingSpline::fit(&x, &y, 1.0, 0).is_err());
	assert!(SmoothingSpline::fit(&x, &y, 1.0, 6).is_err());
	assert!(SmoothingSpline::fit(&x, &y, -1.0, 3).is_err());
	assert!(SmoothingSpline::fit(&[0.0, 2.0, 1.0, 3.0], &[1.0; 4], 1.0, 2).is_err());
	assert!(SmoothingSpline::fit(&x, &[1.0, 2.0, f64::NAN, 1.0, 1.0], 1.0, 2).is_err());
	assert!(SmoothingSpline::fit(&x, &y, 1.0, 4).is_ok());
    }

    #[test]
    fn extrapolates_with_boundary_pieces() {
	let x = axis(10);
	let y : Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
	let spline = SmoothingSpline::fit(&x, &y, 0.5, 1).unwrap();
	assert!((spline.evaluate(-2.0) + 3.0).abs() < 1e-9);
	assert!((spline.evaluate(12.0) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn jumps_vanish_on_a_single_polynomial_piece() {
	let x = axis(20);
	let y : Vec<f64> = x.iter().map(|v| v * v).collect();
	let t = interpolation_knots(&x, 3);
	let b = discontinuity_jumps(&t, 3);
	assert_eq!(b.nrows(), t.len() - 8);
	let fit = least_squares(&x, &y, &t, 3, None).unwrap();
	let c = DVector::from_vec(fit.coefs);
	assert!((b * c).iter().all(|j| j.abs() < 1e-6));
    }

}
