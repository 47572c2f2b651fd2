/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 14/06/2022
Last Modified: 02/11/2023
License: MIT
*/

use crate::graph::RiverGraph;
use crate::observations::ObservationRecord;
use crate::propagate::{run_model, DecayRule};
use crate::sources::{initial_loads, ModelParameters, SourceRecord};
use contam_common::algorithms::{minimize, NelderMeadOptions};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};
use std::collections::HashSet;
use std::fs;
use std::io::{Error, ErrorKind, Write};
use std::path::PathBuf;

/// The attenuation-rate search interval (per hour). Decay constants of
/// environmentally relevant contaminants sit well inside it.
pub const ATTENUATION_BOUNDS: (f64, f64) = (0.0, 0.05);

/// Fits the in-stream attenuation rate and the excretion multiplier against
/// observed concentrations at gauged cells.
///
/// The graph is restricted at construction to the basins that contain an
/// observation, the topological order is computed once, and the per-node
/// load vector is built once at unit excretion: because the model is linear
/// in the source loads, the excretion multiplier has the closed-form
/// least-squares optimum `sum(pred * obs) / sum(pred^2)` at any attenuation
/// rate, so the search itself is one-dimensional. The optimiser interface
/// stays two-dimensional for drop-in compatibility with existing drivers;
/// the second coordinate is pinned by a degenerate bound and inert.
pub struct Calibrator {
    graph: RiverGraph,
    order: Vec<usize>,
    loads: Vec<f64>,
    obs_pixels: Vec<i64>,
    obs_indices: Vec<usize>,
    observations: Vec<f64>,
    discharges: Vec<f64>,
    weighted: bool,
    checkpoint_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct CalibrationResult {
    pub attenuation: f64,
    pub excretion: f64,
    pub r_squared: f64,
    /// Significance of the fitted relation (F test against the null model).
    pub p_value: f64,
    /// False when the optimiser hit its iteration cap; the reported
    /// parameters are then the best found so far.
    pub converged: bool,
    pub iterations: usize,
    pub obs_pixels: Vec<i64>,
    pub predictions: Vec<f64>,
    pub observations: Vec<f64>,
    pub discharges: Vec<f64>,
}

#[derive(Serialize)]
struct Checkpoint<'a> {
    loss_ratio: f64,
    attenuation: f64,
    excretion: f64,
    predictions: &'a [f64],
    discharges: &'a [f64],
}

impl Calibrator {
    /// `params` supplies the treatment efficacies; its excretion value is
    /// ignored (the calibrator always propagates at unit excretion).
    /// Observations at pixels missing from the graph are dropped.
    pub fn new(
        graph: &RiverGraph,
        sources: &[SourceRecord],
        observations: &[ObservationRecord],
        params: &ModelParameters,
        weighted: bool,
    ) -> Result<Calibrator, Error> {
        let basin = graph.basin()?;
        graph.residence_time()?;
        graph.discharge()?;

        let mut obs_basins: HashSet<i32> = HashSet::new();
        let mut snapped: Vec<ObservationRecord> = vec![];
        for obs in observations {
            if let Some(i) = graph.index_of(obs.pixel) {
                obs_basins.insert(basin[i]);
                snapped.push(*obs);
            }
        }
        if snapped.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "None of the observation pixels are present in the graph.",
            ));
        }
        if snapped.iter().all(|o| o.value == 0f64) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "The observed concentrations are all zero; nothing can be fitted.",
            ));
        }

        // only the gauged basins matter for the objective
        let keep: HashSet<i64> = (0..graph.num_nodes())
            .filter(|&i| obs_basins.contains(&basin[i]))
            .map(|i| graph.node_id(i))
            .collect();
        let restricted = graph.subgraph(&keep);
        let order = restricted.topological_order()?;

        let unit_params = ModelParameters {
            excretion: 1f64,
            ..*params
        };
        let (loads, _skipped) = initial_loads(&restricted, sources, &unit_params);

        let discharge = restricted.discharge()?;
        let mut obs_pixels = vec![];
        let mut obs_indices = vec![];
        let mut obs_values = vec![];
        let mut discharges = vec![];
        for obs in &snapped {
            if let Some(i) = restricted.index_of(obs.pixel) {
                obs_pixels.push(obs.pixel);
                obs_indices.push(i);
                obs_values.push(obs.value);
                discharges.push(discharge[i]);
            }
        }

        Ok(Calibrator {
            graph: restricted,
            order,
            loads,
            obs_pixels,
            obs_indices,
            observations: obs_values,
            discharges,
            weighted,
            checkpoint_path: None,
        })
    }

    /// Persist the best-so-far parameters after every objective evaluation.
    /// The file is written whole to a temporary name and swapped in with a
    /// rename, so a cancelled calibration never leaves a torn file behind.
    pub fn set_checkpoint_path(&mut self, path: PathBuf) {
        self.checkpoint_path = Some(path);
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), Error> {
        let path = match &self.checkpoint_path {
            Some(p) => p,
            None => return Ok(()),
        };
        let tmp = path.with_extension("tmp");
        let payload = serde_json::to_vec(checkpoint)
            .map_err(|e| Error::new(ErrorKind::InvalidData, format!("{}", e)))?;
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&payload)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Predictions at the observation cells for the given attenuation rate,
    /// at unit excretion.
    fn predictions(&self, attenuation: f64) -> Result<Vec<f64>, Error> {
        let result = run_model(
            &self.graph,
            &self.order,
            &self.loads,
            attenuation,
            DecayRule::Combined,
        )?;
        Ok(self
            .obs_indices
            .iter()
            .map(|&i| result.relative[i])
            .collect())
    }

    fn excretion_estimate(&self, predictions: &[f64]) -> f64 {
        let num: f64 = predictions
            .iter()
            .zip(self.observations.iter())
            .map(|(p, o)| p * o)
            .sum();
        let den: f64 = predictions.iter().map(|p| p * p).sum();
        if den > 0f64 {
            num / den
        } else {
            0f64
        }
    }

    // (loss, null-model loss, excretion, scaled predictions)
    fn losses(&self, attenuation: f64) -> Result<(f64, f64, f64, Vec<f64>), Error> {
        let mut predictions = self.predictions(attenuation)?;
        let excretion = self.excretion_estimate(&predictions);
        for p in predictions.iter_mut() {
            *p *= excretion;
        }

        let n = self.observations.len() as f64;
        let weights: Vec<f64> = if self.weighted {
            let mean_discharge: f64 = self.discharges.iter().sum::<f64>() / n;
            self.discharges
                .iter()
                .map(|d| (d / mean_discharge).sqrt())
                .collect()
        } else {
            vec![1f64; self.observations.len()]
        };
        let weighted_obs: Vec<f64> = self
            .observations
            .iter()
            .zip(weights.iter())
            .map(|(o, w)| o * w)
            .collect();
        let weighted_pred: Vec<f64> = predictions
            .iter()
            .zip(weights.iter())
            .map(|(p, w)| p * w)
            .collect();
        let loss: f64 = weighted_obs
            .iter()
            .zip(weighted_pred.iter())
            .map(|(o, p)| (o - p) * (o - p))
            .sum::<f64>()
            / n;
        let mean_obs: f64 = weighted_obs.iter().sum::<f64>() / n;
        let null_loss: f64 = weighted_obs
            .iter()
            .map(|o| (o - mean_obs) * (o - mean_obs))
            .sum::<f64>()
            / n;
        Ok((loss, null_loss, excretion, predictions))
    }

    /// The optimiser objective: `params[0]` is the attenuation rate and
    /// `params[1]` is inert. A propagation failure makes the evaluation
    /// worthless rather than fatal, so it returns infinity and the simplex
    /// moves away.
    pub fn objective(&self, params: &[f64]) -> f64 {
        match self.losses(params[0]) {
            Ok((loss, null_loss, excretion, predictions)) => {
                let _ = self.write_checkpoint(&Checkpoint {
                    loss_ratio: if null_loss > 0f64 { loss / null_loss } else { 0f64 },
                    attenuation: params[0],
                    excretion,
                    predictions: &predictions,
                    discharges: &self.discharges,
                });
                loss
            }
            Err(_) => f64::INFINITY,
        }
    }

    /// Runs the bounded Nelder-Mead search from `start_attenuation` and
    /// reports the fitted parameters with their goodness of fit.
    pub fn calibrate(
        &self,
        start_attenuation: f64,
        options: &NelderMeadOptions,
    ) -> Result<CalibrationResult, Error> {
        let bounds = [ATTENUATION_BOUNDS, (0f64, 0f64)];
        let result = minimize(
            |x: &[f64]| self.objective(x),
            &[start_attenuation, 0f64],
            &bounds,
            options,
        )?;

        let attenuation = result.x[0];
        let (loss, null_loss, excretion, predictions) = self.losses(attenuation)?;
        let r_squared = if null_loss > 0f64 {
            1f64 - loss / null_loss
        } else {
            0f64
        };

        // F test of the fitted relation against the flat null model
        let n = self.observations.len() as f64;
        let p_value = if n > 2f64 && loss > 0f64 {
            let ss_total = null_loss * n;
            let ss_error = loss * n;
            let df_error = n - 2f64;
            let f_stat = (ss_total - ss_error) / (ss_error / df_error);
            match FisherSnedecor::new(1f64, df_error) {
                Ok(f) => 1f64 - f.cdf(f_stat.max(0f64)),
                Err(_) => f64::NAN,
            }
        } else {
            0f64
        };

        Ok(CalibrationResult {
            attenuation,
            excretion,
            r_squared,
            p_value,
            converged: result.converged,
            iterations: result.iterations,
            obs_pixels: self.obs_pixels.clone(),
            predictions,
            observations: self.observations.clone(),
            discharges: self.discharges.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::Calibrator;
    use crate::graph::RiverGraph;
    use crate::observations::ObservationRecord;
    use crate::propagate::{run_model, DecayRule};
    use crate::sources::{initial_loads, ModelParameters, SourceRecord};
    use contam_common::algorithms::NelderMeadOptions;

    fn params() -> ModelParameters {
        ModelParameters {
            excretion: 1.0,
            attenuation: 0.0,
            filter_efficacy: 1.0,
            primary_efficacy: 0.33,
            secondary_efficacy: 0.70,
            tertiary_efficacy: 0.92,
        }
    }

    fn source(pixel: i64, treat_a: f64) -> SourceRecord {
        SourceRecord {
            pixel,
            treatment_level: 0,
            treat_a,
            filt_a: 0.0,
            unfilt_a: 0.0,
            pollution: 1.0,
            country_id: 0,
            lat: 0.0,
            lon: 0.0,
        }
    }

    // a chain of 8 cells with varied residence times and discharges
    fn test_graph() -> RiverGraph {
        let ids: Vec<i64> = (1..=8).collect();
        let downstream: Vec<i64> = (1..=8).map(|i| if i < 8 { i + 1 } else { -1 }).collect();
        let mut g = RiverGraph::from_links(ids, &downstream).unwrap();
        g.set_basin(vec![1; 8]);
        g.set_residence_time(vec![2.0, 8.0, 3.0, 12.0, 6.0, 9.0, 4.0, 10.0]);
        g.set_discharge(vec![5.0, 8.0, 12.0, 20.0, 33.0, 50.0, 80.0, 120.0]);
        g
    }

    #[test]
    fn test_recovers_synthetic_parameters() {
        let g = test_graph();
        let sources = vec![source(1, 120.0), source(3, 60.0), source(5, 200.0)];
        let true_attenuation = 0.01;
        let true_excretion = 1.7;

        // synthesize noise-free observations at four gauges
        let order = g.topological_order().unwrap();
        let (loads, _) = initial_loads(&g, &sources, &params());
        let result = run_model(&g, &order, &loads, true_attenuation, DecayRule::Combined).unwrap();
        let gauges = [2i64, 4, 6, 8];
        let observations: Vec<ObservationRecord> = gauges
            .iter()
            .map(|&p| ObservationRecord {
                pixel: p,
                value: true_excretion * result.relative[g.index_of(p).unwrap()],
            })
            .collect();

        let calibrator = Calibrator::new(&g, &sources, &observations, &params(), false).unwrap();
        assert_eq!(calibrator.num_observations(), 4);
        let fit = calibrator
            .calibrate(0.005, &NelderMeadOptions::default())
            .unwrap();
        assert!(fit.converged);
        assert!(
            (fit.attenuation - true_attenuation).abs() < 1e-4,
            "attenuation {}",
            fit.attenuation
        );
        assert!(
            (fit.excretion - true_excretion).abs() < 1e-3,
            "excretion {}",
            fit.excretion
        );
        assert!(fit.r_squared >= 1.0 - 1e-6, "r_squared {}", fit.r_squared);
    }

    #[test]
    fn test_weighted_loss_also_recovers_parameters() {
        let g = test_graph();
        let sources = vec![source(1, 150.0), source(4, 90.0)];
        let order = g.topological_order().unwrap();
        let (loads, _) = initial_loads(&g, &sources, &params());
        let result = run_model(&g, &order, &loads, 0.02, DecayRule::Combined).unwrap();
        let observations: Vec<ObservationRecord> = [2i64, 5, 7]
            .iter()
            .map(|&p| ObservationRecord {
                pixel: p,
                value: 0.8 * result.relative[g.index_of(p).unwrap()],
            })
            .collect();
        let calibrator = Calibrator::new(&g, &sources, &observations, &params(), true).unwrap();
        let fit = calibrator
            .calibrate(0.001, &NelderMeadOptions::default())
            .unwrap();
        assert!((fit.attenuation - 0.02).abs() < 1e-4);
        assert!((fit.excretion - 0.8).abs() < 1e-3);
    }

    #[test]
    fn test_all_zero_observations_rejected() {
        let g = test_graph();
        let sources = vec![source(1, 100.0)];
        let observations = vec![
            ObservationRecord { pixel: 2, value: 0.0 },
            ObservationRecord { pixel: 4, value: 0.0 },
        ];
        assert!(Calibrator::new(&g, &sources, &observations, &params(), false).is_err());
    }

    #[test]
    fn test_restricts_to_gauged_basins() {
        // two disconnected basins; only basin 1 is gauged
        let ids = vec![1, 2, 11, 12];
        let downstream = vec![2, -1, 12, -1];
        let mut g = RiverGraph::from_links(ids, &downstream).unwrap();
        g.set_basin(vec![1, 1, 2, 2]);
        g.set_residence_time(vec![1.0, 2.0, 1.0, 2.0]);
        g.set_discharge(vec![10.0, 10.0, 10.0, 10.0]);
        let sources = vec![source(1, 100.0), source(11, 100.0)];
        let observations = vec![ObservationRecord { pixel: 2, value: 3.0 }];
        let calibrator = Calibrator::new(&g, &sources, &observations, &params(), false).unwrap();
        assert_eq!(calibrator.num_observations(), 1);
        // the ungauged basin contributes no rows to the objective
        assert_eq!(calibrator.graph.num_nodes(), 2);
    }

    #[test]
    fn test_checkpoint_written_atomically() {
        let g = test_graph();
        let sources = vec![source(1, 100.0)];
        let order = g.topological_order().unwrap();
        let (loads, _) = initial_loads(&g, &sources, &params());
        let result = run_model(&g, &order, &loads, 0.01, DecayRule::Combined).unwrap();
        let observations = vec![ObservationRecord {
            pixel: 4,
            value: result.relative[g.index_of(4).unwrap()],
        }];
        let mut calibrator =
            Calibrator::new(&g, &sources, &observations, &params(), false).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.json");
        calibrator.set_checkpoint_path(path.clone());
        calibrator.objective(&[0.01, 0.0]);
        let contents = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert!(value.get("attenuation").is_some());
        assert!(value.get("excretion").is_some());
        // no torn temporary left behind
        assert!(!path.with_extension("tmp").exists());
    }
}
