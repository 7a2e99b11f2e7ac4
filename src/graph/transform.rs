//! Rewrites of a computation graph built on `ComputationGraph::replace`.
//!
//! Every transformation adds the nodes it needs to the registry and returns
//! a new graph; the graph passed in stays valid and unchanged.

use super::computation::ComputationGraph;
use crate::config::Config;
use crate::error::GraphError;
use crate::store::{NodeId, NodeMetadata, Operation, Registry, Role, Shape, Tensor};
use indexmap::IndexSet;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use smallvec::{smallvec, SmallVec};

/// Adds Gaussian noise with standard deviation `level` to each of
/// `variables`.
///
/// Each variable draws from its own stream. The stream seeds are drawn in
/// order from a generator seeded with `seed` (or `config.default_seed`), so
/// two base seeds never share a stream.
pub fn apply_noise(
    registry: &mut Registry,
    graph: &ComputationGraph,
    variables: &[NodeId],
    level: f64,
    seed: Option<u64>,
    config: &Config,
) -> Result<ComputationGraph, GraphError> {
    let seed = seed.unwrap_or(config.default_seed);
    let mut streams = StdRng::seed_from_u64(seed);
    let mut replacements = Vec::with_capacity(variables.len());
    for &variable in variables {
        let op = Operation::RandomNormal { std: level, seed: streams.next_u64() };
        let noise = registry.apply(op, &[variable])?;
        let noisy = registry.apply(Operation::Add, &[variable, noise])?;
        replacements.push((variable, noisy));
    }
    tracing::debug!(variables = variables.len(), level, seed, "applying noise");
    graph.replace(registry, replacements)
}

/// Moves the values of `params` into one shared vector named
/// `collected_params` and rewires the graph to read each parameter from its
/// segment of that vector.
///
/// The segments keep the roles and annotations of the parameters they stand
/// in for. A parameter listed twice gets one segment. With no parameters the
/// graph is returned as is.
pub fn collect_parameters(
    registry: &mut Registry,
    graph: &ComputationGraph,
    params: &[NodeId],
) -> Result<ComputationGraph, GraphError> {
    let params: IndexSet<NodeId> = params.iter().copied().collect();
    if params.is_empty() {
        return Ok(graph.clone());
    }

    let mut values = Vec::new();
    let mut segments: Vec<(usize, usize, Shape)> = Vec::with_capacity(params.len());
    for &param in &params {
        registry.check(param)?;
        let value = match registry.value(param) {
            Some(value) if registry.is_shared(param) => value,
            _ => return Err(GraphError::NotShared(param)),
        };
        let start = values.len();
        values.extend_from_slice(value.data());
        segments.push((start, values.len(), Shape::from_slice(value.shape())));
    }

    let total = values.len();
    let buffer = registry.add_shared(Tensor::vector(values), NodeMetadata::named("collected_params"));

    let mut replacements = Vec::with_capacity(params.len());
    for (&param, (start, end, shape)) in params.iter().zip(segments) {
        let slice = registry.apply(Operation::Slice { start, end }, &[buffer])?;
        let segment = registry.apply(Operation::Reshape { shape }, &[slice])?;
        registry.copy_tag(param, segment);
        registry.meta[segment.index()].name = None;
        replacements.push((param, segment));
    }
    tracing::debug!(params = params.len(), total, "collected parameters");
    graph.replace(registry, replacements)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormOptions {
    /// Axes the statistics are taken over.
    pub axes: SmallVec<[usize; 4]>,
    /// Variables normalized with population statistics instead of batch
    /// statistics.
    pub use_population: Vec<NodeId>,
    /// Overrides `Config::batch_norm_epsilon`.
    pub epsilon: Option<f64>,
}

impl Default for BatchNormOptions {
    fn default() -> Self {
        Self { axes: smallvec![0], use_population: Vec::new(), epsilon: None }
    }
}

/// Replaces each of `variables` with its normalized version, scaled by the
/// matching entry of `gammas` and shifted by the matching entry of `betas`.
///
/// Gammas and betas become shared parameters. Variables listed in
/// `options.use_population` read their mean and variance from new shared
/// variables (zeros and ones) tagged `BatchNormPopulation`.
pub fn apply_batch_normalization(
    registry: &mut Registry,
    graph: &ComputationGraph,
    variables: &[NodeId],
    gammas: &[Tensor],
    betas: &[Tensor],
    options: &BatchNormOptions,
    config: &Config,
) -> Result<ComputationGraph, GraphError> {
    for (what, len) in [("gammas", gammas.len()), ("betas", betas.len())] {
        if len != variables.len() {
            return Err(GraphError::LengthMismatch { what, expected: variables.len(), actual: len });
        }
    }
    let epsilon = options.epsilon.unwrap_or(config.batch_norm_epsilon);
    let op = Operation::BatchNormalize { axes: options.axes.clone(), epsilon };

    let mut replacements = Vec::with_capacity(variables.len());
    for ((&variable, gamma), beta) in variables.iter().zip(gammas).zip(betas) {
        registry.check(variable)?;
        let base = registry.name(variable).unwrap_or("bn").to_owned();
        let gamma = registry.add_shared(
            gamma.clone(),
            NodeMetadata::named(format!("{}_gamma", base)).with_role(Role::Parameter).with_role(Role::Weight),
        );
        let beta = registry.add_shared(
            beta.clone(),
            NodeMetadata::named(format!("{}_beta", base)).with_role(Role::Parameter).with_role(Role::Bias),
        );

        let mut parents: SmallVec<[NodeId; 5]> = smallvec![variable, gamma, beta];
        if options.use_population.contains(&variable) {
            let groups = registry.value(gamma).map_or(0, Tensor::len);
            let population = |suffix: &str| {
                NodeMetadata::named(format!("{}_population_{}", base, suffix)).with_role(Role::BatchNormPopulation)
            };
            parents.push(registry.add_shared(Tensor::zeros(&[groups]), population("mean")));
            parents.push(registry.add_shared(Tensor::filled(&[groups], 1.0), population("var")));
        }
        let normalized = registry.apply(op.clone(), &parents)?;
        replacements.push((variable, normalized));
    }
    tracing::debug!(variables = variables.len(), epsilon, "applying batch normalization");
    graph.replace(registry, replacements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_rejects_non_shared() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let y = reg.apply(Operation::Exp, &[x]).unwrap();
        let cg = ComputationGraph::new(&reg, y).unwrap();
        assert_eq!(collect_parameters(&mut reg, &cg, &[x]).unwrap_err(), GraphError::NotShared(x));
    }

    #[test]
    fn test_collected_segments_keep_roles() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let w = reg.add_shared(
            Tensor::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
            NodeMetadata::named("W").with_role(Role::Weight),
        );
        let b = reg.add_shared(Tensor::vector(vec![5.0, 6.0]), NodeMetadata::named("b").with_role(Role::Bias));
        let xw = reg.apply(Operation::MatMul, &[x, w]).unwrap();
        let y = reg.apply(Operation::Add, &[xw, b]).unwrap();
        let cg = ComputationGraph::new(&reg, y).unwrap();

        let collected = collect_parameters(&mut reg, &cg, &[w, b]).unwrap();
        let shared = collected.shared_variables(&reg);
        assert_eq!(shared.len(), 1);
        assert_eq!(reg.name(shared[0]), Some("collected_params"));
        assert_eq!(reg.value(shared[0]).unwrap().data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let weights = collected.variables_with_role(&reg, Role::Weight);
        assert_eq!(weights.len(), 1);
        assert_eq!(reg.name(weights[0]), None);
        assert!(matches!(
            reg.kind(weights[0]),
            crate::store::NodeKind::Apply(Operation::Reshape { shape }) if shape.as_slice() == [2, 2]
        ));
    }

    #[test]
    fn test_collect_nothing_is_a_no_op() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let w = reg.add_shared(Tensor::vector(vec![1.0, 2.0]), NodeMetadata::named("w"));
        let y = reg.apply(Operation::Multiply, &[x, w]).unwrap();
        let cg = ComputationGraph::new(&reg, y).unwrap();

        let count = reg.count();
        let collected = collect_parameters(&mut reg, &cg, &[]).unwrap();
        assert_eq!(reg.count(), count);
        assert_eq!(collected, cg);
    }

    #[test]
    fn test_collect_repeated_param_once() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let w = reg.add_shared(Tensor::vector(vec![1.0, 2.0]), NodeMetadata::named("w"));
        let y = reg.apply(Operation::Multiply, &[x, w]).unwrap();
        let cg = ComputationGraph::new(&reg, y).unwrap();

        let collected = collect_parameters(&mut reg, &cg, &[w, w]).unwrap();
        let shared = collected.shared_variables(&reg);
        assert_eq!(shared.len(), 1);
        assert_eq!(reg.value(shared[0]).unwrap().data(), &[1.0, 2.0]);
    }

    #[test]
    fn test_batch_norm_lengths_checked() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let cg = ComputationGraph::new(&reg, x).unwrap();
        let err = apply_batch_normalization(
            &mut reg,
            &cg,
            &[x],
            &[],
            &[Tensor::scalar(0.0)],
            &BatchNormOptions::default(),
            &Config::default(),
        )
        .unwrap_err();
        assert_eq!(err, GraphError::LengthMismatch { what: "gammas", expected: 1, actual: 0 });
    }

    #[test]
    fn test_noise_nodes_follow_seed() {
        let mut reg = Registry::new();
        let x = reg.add_input(NodeMetadata::named("x"));
        let y = reg.add_input(NodeMetadata::named("y"));
        let z = reg.apply(Operation::Add, &[x, y]).unwrap();
        let cg = ComputationGraph::new(&reg, z).unwrap();

        let config = Config { default_seed: 5, ..Config::default() };
        let noisy = apply_noise(&mut reg, &cg, &[x, y], 0.1, None, &config).unwrap();
        let mut streams = StdRng::seed_from_u64(5);
        let expected = vec![streams.next_u64(), streams.next_u64()];
        let seeds: Vec<u64> = noisy
            .variables()
            .iter()
            .filter_map(|&n| match reg.kind(n) {
                crate::store::NodeKind::Apply(Operation::RandomNormal { seed, .. }) => Some(*seed),
                _ => None,
            })
            .collect();
        assert_eq!(seeds, expected);
    }
}
