/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 04/05/2022
Last Modified: 19/09/2023
License: MIT
*/

use std::io::{Error, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Options for the `minimize` function.
///
/// `cancelled` is polled before every objective evaluation; setting the flag
/// from another thread aborts the minimisation with an `Interrupted` error
/// and no further evaluations.
pub struct NelderMeadOptions {
    pub max_iterations: usize,
    pub ftol: f64,
    pub cancelled: Option<Arc<AtomicBool>>,
}

impl Default for NelderMeadOptions {
    fn default() -> NelderMeadOptions {
        NelderMeadOptions {
            max_iterations: 500,
            ftol: 1e-10,
            cancelled: None,
        }
    }
}

pub struct NelderMeadResult {
    pub x: Vec<f64>,
    pub fx: f64,
    pub iterations: usize,
    /// False when the iteration cap was reached before the simplex
    /// collapsed; `x` then holds the best vertex found so far.
    pub converged: bool,
}

fn check_cancelled(flag: &Option<Arc<AtomicBool>>) -> Result<(), Error> {
    if let Some(f) = flag {
        if f.load(Ordering::Relaxed) {
            return Err(Error::new(
                ErrorKind::Interrupted,
                "The minimisation was cancelled.",
            ));
        }
    }
    Ok(())
}

/// Minimises `f` over the box given by `bounds` using the Nelder-Mead
/// downhill simplex method. Every candidate vertex is clamped to the box
/// coordinate-wise. A degenerate bound (`lo == hi`) pins that coordinate at
/// `lo` and removes it from the search, so callers can keep a fixed-width
/// parameter vector while optimising a subset of it.
pub fn minimize<F>(
    mut f: F,
    x0: &[f64],
    bounds: &[(f64, f64)],
    options: &NelderMeadOptions,
) -> Result<NelderMeadResult, Error>
where
    F: FnMut(&[f64]) -> f64,
{
    if x0.len() != bounds.len() {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "The starting point and the bounds differ in dimension.",
        ));
    }
    for &(lo, hi) in bounds {
        if lo > hi || !lo.is_finite() || !hi.is_finite() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Each bound must be a finite interval with lo <= hi.",
            ));
        }
    }

    // pinned coordinates are fixed in `base`; the simplex only spans the
    // free coordinates
    let n = x0.len();
    let mut base: Vec<f64> = (0..n)
        .map(|i| x0[i].max(bounds[i].0).min(bounds[i].1))
        .collect();
    let free: Vec<usize> = (0..n).filter(|&i| bounds[i].1 > bounds[i].0).collect();

    if free.is_empty() {
        check_cancelled(&options.cancelled)?;
        let fx = f(&base);
        return Ok(NelderMeadResult {
            x: base,
            fx,
            iterations: 0,
            converged: true,
        });
    }

    let nf = free.len();
    let expand_point = |xf: &[f64], base: &[f64]| -> Vec<f64> {
        let mut x = base.to_vec();
        for (i, &d) in free.iter().enumerate() {
            x[d] = xf[i];
        }
        x
    };
    let clamp = |xf: &mut Vec<f64>| {
        for (i, &d) in free.iter().enumerate() {
            xf[i] = xf[i].max(bounds[d].0).min(bounds[d].1);
        }
    };

    // initial simplex: perturb each free coordinate by 5% of its range
    let x0f: Vec<f64> = free.iter().map(|&d| base[d]).collect();
    let mut vertices: Vec<Vec<f64>> = vec![x0f.clone()];
    for i in 0..nf {
        let d = free[i];
        let step = 0.05f64 * (bounds[d].1 - bounds[d].0);
        let mut v = x0f.clone();
        v[i] += step;
        clamp(&mut v);
        if v[i] == x0f[i] {
            v[i] -= step;
            clamp(&mut v);
        }
        vertices.push(v);
    }

    let mut values = Vec::with_capacity(nf + 1);
    for v in &vertices {
        check_cancelled(&options.cancelled)?;
        values.push(f(&expand_point(v, &base)));
    }

    let mut iterations = 0usize;
    let mut converged = false;
    while iterations < options.max_iterations {
        iterations += 1;

        // order the simplex from best to worst
        let mut idx: Vec<usize> = (0..=nf).collect();
        idx.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(std::cmp::Ordering::Equal));
        let ordered_v: Vec<Vec<f64>> = idx.iter().map(|&i| vertices[i].clone()).collect();
        let ordered_f: Vec<f64> = idx.iter().map(|&i| values[i]).collect();
        vertices = ordered_v;
        values = ordered_f;

        if (values[nf] - values[0]).abs() <= options.ftol * (1f64 + values[0].abs()) {
            converged = true;
            break;
        }

        // centroid of all vertices but the worst
        let mut centroid = vec![0f64; nf];
        for v in vertices.iter().take(nf) {
            for i in 0..nf {
                centroid[i] += v[i] / nf as f64;
            }
        }

        let worst = vertices[nf].clone();
        let mut reflected: Vec<f64> = (0..nf).map(|i| centroid[i] + (centroid[i] - worst[i])).collect();
        clamp(&mut reflected);
        check_cancelled(&options.cancelled)?;
        let f_reflected = f(&expand_point(&reflected, &base));

        if f_reflected < values[0] {
            let mut expanded: Vec<f64> = (0..nf)
                .map(|i| centroid[i] + 2f64 * (centroid[i] - worst[i]))
                .collect();
            clamp(&mut expanded);
            check_cancelled(&options.cancelled)?;
            let f_expanded = f(&expand_point(&expanded, &base));
            if f_expanded < f_reflected {
                vertices[nf] = expanded;
                values[nf] = f_expanded;
            } else {
                vertices[nf] = reflected;
                values[nf] = f_reflected;
            }
        } else if f_reflected < values[nf - 1] {
            vertices[nf] = reflected;
            values[nf] = f_reflected;
        } else {
            // contract, either outside or inside the worst vertex
            let outside = f_reflected < values[nf];
            let mut contracted: Vec<f64> = if outside {
                (0..nf).map(|i| centroid[i] + 0.5f64 * (centroid[i] - worst[i])).collect()
            } else {
                (0..nf).map(|i| centroid[i] - 0.5f64 * (centroid[i] - worst[i])).collect()
            };
            clamp(&mut contracted);
            check_cancelled(&options.cancelled)?;
            let f_contracted = f(&expand_point(&contracted, &base));
            let accept = if outside {
                f_contracted <= f_reflected
            } else {
                f_contracted < values[nf]
            };
            if accept {
                vertices[nf] = contracted;
                values[nf] = f_contracted;
            } else {
                // shrink the whole simplex towards the best vertex
                let best = vertices[0].clone();
                for j in 1..=nf {
                    for i in 0..nf {
                        vertices[j][i] = best[i] + 0.5f64 * (vertices[j][i] - best[i]);
                    }
                    let mut v = vertices[j].clone();
                    clamp(&mut v);
                    vertices[j] = v;
                    check_cancelled(&options.cancelled)?;
                    values[j] = f(&expand_point(&vertices[j], &base));
                }
            }
        }
    }

    let mut best = 0usize;
    for i in 1..=nf {
        if values[i] < values[best] {
            best = i;
        }
    }
    for (i, &d) in free.iter().enumerate() {
        base[d] = vertices[best][i];
    }
    Ok(NelderMeadResult {
        x: base,
        fx: values[best],
        iterations,
        converged,
    })
}

#[cfg(test)]
mod test {
    use super::{minimize, NelderMeadOptions};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_quadratic_bowl() {
        let f = |x: &[f64]| (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2);
        let res = minimize(
            f,
            &[0.0, 0.0],
            &[(-10.0, 10.0), (-10.0, 10.0)],
            &NelderMeadOptions::default(),
        )
        .unwrap();
        assert!(res.converged);
        assert!((res.x[0] - 1.0).abs() < 1e-4);
        assert!((res.x[1] + 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_optimum_on_boundary() {
        let f = |x: &[f64]| (x[0] + 2.0).powi(2);
        let res = minimize(f, &[0.5], &[(0.0, 1.0)], &NelderMeadOptions::default()).unwrap();
        assert!(res.x[0].abs() < 1e-4);
    }

    #[test]
    fn test_degenerate_bound_pins_coordinate() {
        let f = |x: &[f64]| (x[0] - 3.0).powi(2) + (x[1] - 5.0).powi(2);
        let res = minimize(
            f,
            &[0.0, 0.7],
            &[(-10.0, 10.0), (0.0, 0.0)],
            &NelderMeadOptions::default(),
        )
        .unwrap();
        assert_eq!(res.x[1], 0.0);
        assert!((res.x[0] - 3.0).abs() < 1e-4);
        assert!((res.fx - 25.0).abs() < 1e-3);
    }

    #[test]
    fn test_cancellation() {
        let flag = Arc::new(AtomicBool::new(true));
        let options = NelderMeadOptions {
            cancelled: Some(flag.clone()),
            ..Default::default()
        };
        let res = minimize(|x: &[f64]| x[0] * x[0], &[1.0], &[(-1.0, 1.0)], &options);
        assert!(res.is_err());
        flag.store(false, Ordering::Relaxed);
        let res = minimize(|x: &[f64]| x[0] * x[0], &[1.0], &[(-1.0, 1.0)], &options);
        assert!(res.is_ok());
    }

    #[test]
    fn test_iteration_cap_reports_nonconvergence() {
        let options = NelderMeadOptions {
            max_iterations: 3,
            ..Default::default()
        };
        let f = |x: &[f64]| (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2);
        let res = minimize(f, &[9.0, 9.0], &[(-10.0, 10.0), (-10.0, 10.0)], &options).unwrap();
        assert!(!res.converged);
        assert_eq!(res.iterations, 3);
    }
}
