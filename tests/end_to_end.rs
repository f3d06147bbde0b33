//! Full fits on simulated fourth-down data: recovery, separation, prior shape errors,
//! reproducibility and comparison of prior configurations.

use choice_logit::{
    ComparisonSet, ConvergenceWarning, Error, FitConfig, LogisticFit, ModelSpec, NormalPrior,
    ObservationTable, PriorSpec, Profile, SamplerConfig, SeparationKind, Term,
    regression::FailureReason,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const TRUE_SLOPE: f64 = 0.05;

/// `n` plays with yards to go uniform on [1, 40] and `P(go) = σ(0.05 · ydstogo)`.
fn simulate(n: usize, seed: u64) -> ObservationTable {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let ydstogo: Vec<f64> = (0..n).map(|_| rng.gen_range(1.0..40.0)).collect();
    let decision: Vec<&str> = ydstogo
        .iter()
        .map(|x| {
            let p = 1.0 / (1.0 + (-TRUE_SLOPE * x).exp());
            if rng.gen_bool(p) { "go" } else { "kick" }
        })
        .collect();
    ObservationTable::new()
        .with_categorical("decision", decision)
        .unwrap()
        .with_continuous("ydstogo", ydstogo)
        .unwrap()
}

fn spec() -> ModelSpec {
    ModelSpec::new("decision", ["kick", "go"]).term(Term::continuous("ydstogo"))
}

fn config(chains: usize, iterations: usize, seed: u64) -> FitConfig {
    FitConfig {
        sampler: SamplerConfig {
            chains,
            iterations,
            seed,
            ..SamplerConfig::default()
        },
        rhat_threshold: 1.05,
        min_ess: 100.0,
        ..FitConfig::default()
    }
}

fn slope_interval(fit: &LogisticFit, level: f64) -> (f64, f64, f64) {
    let summary = fit.summary(level).unwrap();
    let row = summary.get("ydstogo").unwrap();
    (row.lower, row.estimate, row.upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_slope_on_large_sample() {
        let fit = choice_logit::fit(&simulate(1000, 1), &spec(), &config(4, 1000, 42)).unwrap();
        let (lower, estimate, upper) = slope_interval(&fit, 0.95);
        assert!(
            (estimate - TRUE_SLOPE).abs() < 0.02,
            "slope estimate {estimate} too far from {TRUE_SLOPE}"
        );
        assert!(lower <= estimate && estimate <= upper);

        assert_eq!(fit.draws().len(), 4 * 500);
        for p in &fit.diagnostics().parameters {
            assert!(p.rhat <= 1.05, "R-hat of {} is {}", p.term, p.rhat);
            assert!(p.ess_bulk > 100.0, "bulk ESS of {} is {}", p.term, p.ess_bulk);
        }
        assert!(!fit
            .warnings()
            .iter()
            .any(|w| matches!(w, ConvergenceWarning::Separation { .. })));
    }

    #[test]
    fn separated_outcome_is_flagged() {
        let ydstogo: Vec<f64> = (1..=60).map(|i| i as f64 * 0.5).collect();
        let decision: Vec<&str> = ydstogo
            .iter()
            .map(|&x| if x < 10.0 { "go" } else { "kick" })
            .collect();
        let table = ObservationTable::new()
            .with_categorical("decision", decision)
            .unwrap()
            .with_continuous("ydstogo", ydstogo)
            .unwrap();

        let fit = choice_logit::fit(&table, &spec(), &config(2, 400, 5)).unwrap();
        assert!(fit.warnings().contains(&ConvergenceWarning::Separation {
            term: "ydstogo".into(),
            kind: SeparationKind::Complete,
        }));
        assert!(!fit.is_converged());
        assert!(matches!(
            fit.require_converged(),
            Err(Error::NotConverged(ref warnings)) if !warnings.is_empty()
        ));
    }

    #[test]
    fn reference_level_separation_is_flagged() {
        // every down-3 play is a kick, down-4 plays are mixed
        let down: Vec<u8> = (0..40).map(|i| if i < 20 { 3 } else { 4 }).collect();
        let decision: Vec<&str> = (0..40)
            .map(|i| if i >= 20 && i % 2 == 0 { "go" } else { "kick" })
            .collect();
        let ydstogo: Vec<f64> = (0..40).map(|i| (i % 7 + 1) as f64).collect();
        let table = ObservationTable::new()
            .with_categorical("decision", decision)
            .unwrap()
            .with_categorical("down", down)
            .unwrap()
            .with_continuous("ydstogo", ydstogo)
            .unwrap();
        let spec = ModelSpec::new("decision", ["kick", "go"])
            .term(Term::categorical("down", [3, 4], 3))
            .term(Term::continuous("ydstogo"));

        let fit = choice_logit::fit(&table, &spec, &config(2, 400, 8)).unwrap();
        assert!(
            fit.warnings().contains(&ConvergenceWarning::Separation {
                term: "down4".into(),
                kind: SeparationKind::Quasi,
            }),
            "{:?}",
            fit.warnings()
        );
        assert!(!fit.is_converged());
    }

    #[test]
    fn timed_out_chains_fail_the_fit() {
        let mut config = config(3, 2_000, 6);
        config.sampler.chain_timeout_secs = Some(1e-9);
        match choice_logit::fit(&simulate(100, 8), &spec(), &config) {
            Err(Error::AllChainsFailed(failures)) => {
                assert_eq!(failures.len(), 3);
                assert!(failures
                    .iter()
                    .all(|f| matches!(f.reason, FailureReason::Timeout { .. })));
            }
            other => panic!("expected every chain to time out, got {other:?}"),
        }
    }

    #[test]
    fn oversized_timeout_is_a_config_error() {
        let mut config = config(2, 200, 1);
        config.sampler.chain_timeout_secs = Some(1e20);
        assert!(matches!(
            choice_logit::fit(&simulate(50, 9), &spec(), &config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn wrong_prior_list_fails_before_sampling() {
        let config = FitConfig {
            prior_overrides: Some(vec![NormalPrior::new(0.0, 1.0); 2]),
            ..FitConfig::default()
        };
        let err = choice_logit::fit(&simulate(50, 2), &spec(), &config).unwrap_err();
        assert_eq!(err, Error::PriorShape { expected: 1, got: 2 });
    }

    #[test]
    fn same_seed_same_draws() {
        let table = simulate(200, 3);
        let a = choice_logit::fit(&table, &spec(), &config(3, 300, 9)).unwrap();
        let b = choice_logit::fit(&table, &spec(), &config(3, 300, 9)).unwrap();
        let c = choice_logit::fit(&table, &spec(), &config(3, 300, 10)).unwrap();
        assert_eq!(a.draws(), b.draws());
        assert_eq!(a.summary(0.9).unwrap(), b.summary(0.9).unwrap());
        assert_ne!(a.draws(), c.draws());
    }

    #[test]
    fn informative_prior_comparison() {
        let early = choice_logit::fit(&simulate(300, 4), &spec(), &config(2, 600, 1)).unwrap();
        let later_table = simulate(300, 5);

        let weak = choice_logit::fit(&later_table, &spec(), &config(2, 600, 2)).unwrap();
        let carried = PriorSpec::from_posterior(&early.summary(0.95).unwrap(), 1.0).unwrap();
        let design = choice_logit::DesignMatrix::build(&later_table, &spec()).unwrap();
        let informed = choice_logit::fit_with_priors(&design, &carried, &config(2, 600, 2)).unwrap();

        let set = ComparisonSet::new(vec![("weak", weak.draws()), ("informative", informed.draws())])
            .unwrap();
        assert_eq!(set.len(), weak.draws().len() + informed.draws().len());
        assert_eq!(set.labels(), ["weak", "informative"]);
        assert_eq!(set.coefficient("ydstogo").unwrap().count(), set.len());

        let summaries = set.summaries(0.95).unwrap();
        let sd = |i: usize| summaries[i].1.get("ydstogo").unwrap().std_error;
        assert!(sd(1) < sd(0), "carried prior should tighten the slope: {} vs {}", sd(1), sd(0));
    }

    #[test]
    fn prediction_follows_the_slope() {
        let fit = choice_logit::fit(&simulate(500, 6), &spec(), &config(2, 600, 3)).unwrap();
        let short = fit
            .predict(&Profile::new().with_number("ydstogo", 1.0), 0.9)
            .unwrap();
        let long = fit
            .predict(&Profile::new().with_number("ydstogo", 39.0), 0.9)
            .unwrap();
        assert!(short.mean < long.mean);
        assert!(short.lower > 0.0 && long.upper < 1.0);
    }

    #[test]
    fn fit_results_serialize() {
        let fit = choice_logit::fit(&simulate(100, 7), &spec(), &config(2, 200, 4)).unwrap();
        let json = serde_json::to_value(fit.summary(0.95).unwrap()).unwrap();
        assert_eq!(json["rows"][1]["term"], "ydstogo");
        let json = serde_json::to_value(fit.diagnostics()).unwrap();
        assert_eq!(json["chains"].as_array().unwrap().len(), 2);
    }

    /// Frequentist coverage of the 95% interval over 100 independent datasets.
    #[test]
    #[ignore = "runs 100 full fits"]
    fn slope_interval_coverage() {
        let covered = (0..100)
            .filter(|&trial| {
                let fit =
                    choice_logit::fit(&simulate(1000, 1_000 + trial), &spec(), &config(4, 1000, trial))
                        .unwrap();
                let (lower, _, upper) = slope_interval(&fit, 0.95);
                lower <= TRUE_SLOPE && TRUE_SLOPE <= upper
            })
            .count();
        assert!(covered >= 94, "95% interval covered the true slope {covered} times out of 100");
    }
}
