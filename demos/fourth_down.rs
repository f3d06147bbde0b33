//! Fourth-down decisions: how often does a team go for it instead of kicking?
//!
//! The example:
//! 1. Simulates two seasons of fourth-down plays (down is always 4 here, so the covariates are
//!    yards to go and field zone)
//! 2. Fits the earlier season with weakly informative priors
//! 3. Fits the later season twice, with weak priors and with priors carried over from the
//!    earlier season's posterior
//! 4. Compares the two later-season posteriors and reports go-for-it probabilities for a few
//!    situations
//!
//! Run with `RUST_LOG=choice_logit=debug` to see per-chain progress.

use choice_logit::{
    ComparisonSet, DesignMatrix, FitConfig, ModelSpec, ObservationTable, PriorSpec, Profile,
    SamplerConfig, Term,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::error::Error;
use tracing_subscriber::EnvFilter;

const ZONES: [&str; 3] = ["own", "midfield", "opponent"];

fn season(n: usize, aggressiveness: f64, seed: u64) -> Result<ObservationTable, Box<dyn Error>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut decision = Vec::with_capacity(n);
    let mut ydstogo = Vec::with_capacity(n);
    let mut zone = Vec::with_capacity(n);
    for _ in 0..n {
        let yds: f64 = rng.gen_range(1.0..15.0);
        let z = rng.gen_range(0..ZONES.len());
        let eta = aggressiveness - 0.35 * yds + 0.6 * z as f64;
        let go = rng.gen_bool(1.0 / (1.0 + (-eta).exp()));
        decision.push(if go { "go" } else { "kick" });
        ydstogo.push(yds.round());
        zone.push(ZONES[z]);
    }
    Ok(ObservationTable::new()
        .with_categorical("decision", decision)?
        .with_continuous("ydstogo", ydstogo)?
        .with_categorical("zone", zone)?)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let spec = ModelSpec::new("decision", ["kick", "go"])
        .term(Term::continuous("ydstogo"))
        .term(Term::categorical("zone", ZONES, "own"));
    let config = FitConfig {
        sampler: SamplerConfig {
            chains: 4,
            iterations: 2_000,
            seed: 2024,
            ..SamplerConfig::default()
        },
        ..FitConfig::default()
    };

    // Earlier season
    let earlier = choice_logit::fit(&season(1_500, -0.5, 1)?, &spec, &config)?;
    println!("Earlier season, weak priors:\n{}", earlier.summary(config.confidence_level)?);

    // Later season, two prior configurations
    let later = DesignMatrix::build(&season(400, 0.0, 2)?, &spec)?;
    let weak = choice_logit::fit_design(&later, &config)?;
    let carried = PriorSpec::from_posterior(&earlier.summary(config.confidence_level)?, 2.0)?;
    let informative = choice_logit::fit_with_priors(&later, &carried, &config)?;

    for (label, fit) in [("weak", &weak), ("informative", &informative)] {
        println!(
            "Later season, {label} priors ({}):\n{}",
            if fit.is_converged() { "converged" } else { "see warnings" },
            fit.summary(config.confidence_level)?
        );
        for warning in fit.warnings() {
            println!("  warning: {warning}");
        }
    }

    let comparison = ComparisonSet::new(vec![("weak", weak.draws()), ("informative", informative.draws())])?;
    println!("Combined draw set: {} rows", comparison.len());
    for (label, summary) in comparison.summaries(config.confidence_level)? {
        if let Some(row) = summary.get("ydstogo") {
            println!(
                "{:<12} ydstogo {:<10.4} [{:.4}, {:.4}]",
                label, row.estimate, row.lower, row.upper
            );
        }
    }

    println!("\nP(go for it), informative priors:");
    for (yds, zone) in [(1.0, "own"), (1.0, "opponent"), (4.0, "midfield"), (10.0, "opponent")] {
        let profile = Profile::new().with_number("ydstogo", yds).with_level("zone", zone);
        let p = informative.predict(&profile, 0.9)?;
        println!(
            "{:>4} to go, {:<9} {:.3} (90% interval {:.3} to {:.3})",
            yds, zone, p.mean, p.lower, p.upper
        );
    }
    Ok(())
}
