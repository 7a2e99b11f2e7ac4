use crate::annotation::{AnnotationId, AnnotationKind};
use crate::compute::Function;
use crate::config::Config;
use crate::error::GraphError;
use crate::graph::{self, BatchNormOptions, ComputationGraph};
use crate::store::{NodeId, NodeMetadata, Operation, Registry, Role, Tensor};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::collections::HashMap;

type PyTensor = (Vec<usize>, Vec<f64>);

fn to_py_err(e: GraphError) -> PyErr {
    match e {
        GraphError::Computation(inner) => PyRuntimeError::new_err(inner.to_string()),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn tensor(value: PyTensor) -> PyResult<Tensor> {
    Tensor::from_shape_vec(&value.0, value.1).map_err(|e| PyValueError::new_err(e.to_string()))
}

fn py_tensor(value: &Tensor) -> PyTensor {
    (value.shape().to_vec(), value.to_vec())
}

fn ids(raw: Vec<usize>) -> Vec<NodeId> {
    raw.into_iter().map(NodeId::new).collect()
}

fn indices(ids: &[NodeId]) -> Vec<usize> {
    ids.iter().map(|id| id.index()).collect()
}

fn role(name: &str) -> PyResult<Role> {
    serde_json::from_value(serde_json::Value::String(name.to_owned()))
        .map_err(|_| PyValueError::new_err(format!("Unknown role '{}'", name)))
}

fn metadata(name: Option<String>, roles: Option<Vec<String>>) -> PyResult<NodeMetadata> {
    let mut meta = NodeMetadata { name, ..Default::default() };
    for r in roles.unwrap_or_default() {
        meta.add_role(role(&r)?);
    }
    Ok(meta)
}

fn operation(name: &str) -> PyResult<Operation> {
    Ok(match name {
        "add" => Operation::Add,
        "subtract" => Operation::Subtract,
        "multiply" => Operation::Multiply,
        "divide" => Operation::Divide,
        "negate" => Operation::Negate,
        "exp" => Operation::Exp,
        "square" => Operation::Square,
        "sqrt" => Operation::Sqrt,
        "identity" => Operation::Identity,
        "sum" => Operation::Sum,
        "mean" => Operation::Mean,
        "matmul" => Operation::MatMul,
        _ => return Err(PyValueError::new_err(format!("Invalid Op '{}'", name))),
    })
}

#[pyclass(name = "_Registry")]
#[derive(Debug, Clone, Default)]
pub struct PyRegistry {
    inner: Registry,
}

#[pymethods]
impl PyRegistry {
    #[new]
    pub fn new() -> Self { Self::default() }

    #[pyo3(signature = (name=None, roles=None))]
    pub fn add_input(&mut self, name: Option<String>, roles: Option<Vec<String>>) -> PyResult<usize> {
        Ok(self.inner.add_input(metadata(name, roles)?).index())
    }

    #[pyo3(signature = (value, name=None, roles=None))]
    pub fn add_shared(&mut self, value: PyTensor, name: Option<String>, roles: Option<Vec<String>>) -> PyResult<usize> {
        Ok(self.inner.add_shared(tensor(value)?, metadata(name, roles)?).index())
    }

    #[pyo3(signature = (value, name=None))]
    pub fn add_constant(&mut self, value: PyTensor, name: Option<String>) -> PyResult<usize> {
        Ok(self.inner.add_constant(tensor(value)?, NodeMetadata { name, ..Default::default() }).index())
    }

    #[pyo3(signature = (op_name, parents, name=None))]
    pub fn apply(&mut self, op_name: &str, parents: Vec<usize>, name: Option<String>) -> PyResult<usize> {
        let meta = NodeMetadata { name, ..Default::default() };
        self.inner.add_apply(operation(op_name)?, &ids(parents), meta).map(|id| id.index()).map_err(to_py_err)
    }

    pub fn add_role(&mut self, id: usize, role_name: &str) -> PyResult<()> {
        self.inner.add_role(NodeId::new(id), role(role_name)?).map_err(to_py_err)
    }

    pub fn name(&self, id: usize) -> Option<String> {
        self.inner.name(NodeId::new(id)).map(str::to_owned)
    }

    pub fn value(&self, id: usize) -> Option<PyTensor> {
        self.inner.value(NodeId::new(id)).map(py_tensor)
    }

    pub fn set_value(&mut self, id: usize, value: PyTensor) -> PyResult<()> {
        self.inner.set_value(NodeId::new(id), tensor(value)?).map_err(to_py_err)
    }

    pub fn create_annotation(&mut self, kind: &str) -> PyResult<u32> {
        let kind = AnnotationKind::from_name(kind)
            .ok_or_else(|| PyValueError::new_err(format!("Unknown annotation kind '{}'", kind)))?;
        Ok(self.inner.create_annotation(kind).0)
    }

    pub fn attach_annotation(&mut self, node: usize, annotation: u32) -> PyResult<()> {
        self.inner.attach_annotation(NodeId::new(node), AnnotationId(annotation)).map_err(to_py_err)
    }

    #[pyo3(signature = (annotation, expression, roles=None, name=None))]
    pub fn add_auxiliary_variable(
        &mut self,
        annotation: u32,
        expression: usize,
        roles: Option<Vec<String>>,
        name: Option<String>,
    ) -> PyResult<()> {
        let roles = roles.unwrap_or_default().iter().map(|r| role(r)).collect::<PyResult<Vec<_>>>()?;
        self.inner
            .add_auxiliary_variable(AnnotationId(annotation), NodeId::new(expression), &roles, name.as_deref())
            .map_err(to_py_err)
    }

    pub fn add_update(&mut self, annotation: u32, variable: usize, expression: usize) -> PyResult<()> {
        self.inner
            .add_update(AnnotationId(annotation), NodeId::new(variable), NodeId::new(expression))
            .map_err(to_py_err)
    }

    pub fn node_count(&self) -> usize { self.inner.count() }
}

#[pyclass(name = "_ComputationGraph")]
#[derive(Debug, Clone)]
pub struct PyComputationGraph {
    inner: ComputationGraph,
}

#[pymethods]
impl PyComputationGraph {
    #[new]
    pub fn new(registry: &PyRegistry, outputs: Vec<usize>) -> PyResult<Self> {
        let inner = ComputationGraph::new(&registry.inner, ids(outputs)).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    pub fn outputs(&self) -> Vec<usize> { indices(self.inner.outputs()) }
    pub fn variables(&self) -> Vec<usize> { indices(self.inner.variables()) }

    pub fn updates(&self) -> Vec<(usize, usize)> {
        self.inner.updates().iter().map(|(k, v)| (k.index(), v.index())).collect()
    }

    pub fn inputs(&self, registry: &PyRegistry) -> Vec<usize> { indices(&self.inner.inputs(&registry.inner)) }

    pub fn shared_variables(&self, registry: &PyRegistry) -> Vec<usize> {
        indices(&self.inner.shared_variables(&registry.inner))
    }

    pub fn auxiliary_variables(&self, registry: &PyRegistry) -> Vec<usize> {
        indices(&self.inner.auxiliary_variables(&registry.inner))
    }

    pub fn intermediary_variables(&self, registry: &PyRegistry) -> Vec<usize> {
        indices(&self.inner.intermediary_variables(&registry.inner))
    }

    pub fn dict_of_inputs(&self, registry: &PyRegistry) -> HashMap<String, usize> {
        self.inner.dict_of_inputs(&registry.inner).into_iter().map(|(k, v)| (k, v.index())).collect()
    }

    pub fn replace(&self, registry: &mut PyRegistry, replacements: Vec<(usize, usize)>) -> PyResult<Self> {
        let pairs = replacements.into_iter().map(|(k, v)| (NodeId::new(k), NodeId::new(v)));
        let inner = self.inner.replace(&mut registry.inner, pairs).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    pub fn to_callable(&self, registry: &PyRegistry) -> PyResult<PyCompiledFunction> {
        let inner = self.inner.to_callable(&registry.inner, None).map_err(to_py_err)?;
        Ok(PyCompiledFunction { inner })
    }

    pub fn snapshot(&self, registry: &mut PyRegistry, data: HashMap<String, PyTensor>) -> PyResult<Vec<(usize, PyTensor)>> {
        let data = data.into_iter().map(|(k, v)| Ok((k, tensor(v)?))).collect::<PyResult<HashMap<_, _>>>()?;
        let snapshot = self.inner.snapshot(&mut registry.inner, &data).map_err(to_py_err)?;
        Ok(snapshot.iter().map(|(k, v)| (k.index(), py_tensor(v))).collect())
    }

    #[pyo3(signature = (registry, variables, level, seed=None))]
    pub fn apply_noise(&self, registry: &mut PyRegistry, variables: Vec<usize>, level: f64, seed: Option<u64>) -> PyResult<Self> {
        let config = Config::from_env().map_err(|e| PyValueError::new_err(e.to_string()))?;
        graph::apply_noise(&mut registry.inner, &self.inner, &ids(variables), level, seed, &config)
            .map(|inner| Self { inner })
            .map_err(to_py_err)
    }

    pub fn collect_parameters(&self, registry: &mut PyRegistry, params: Vec<usize>) -> PyResult<Self> {
        graph::collect_parameters(&mut registry.inner, &self.inner, &ids(params))
            .map(|inner| Self { inner })
            .map_err(to_py_err)
    }

    #[pyo3(signature = (registry, variables, gammas, betas, axes=None, use_population=None))]
    pub fn apply_batch_normalization(
        &self,
        registry: &mut PyRegistry,
        variables: Vec<usize>,
        gammas: Vec<PyTensor>,
        betas: Vec<PyTensor>,
        axes: Option<Vec<usize>>,
        use_population: Option<Vec<usize>>,
    ) -> PyResult<Self> {
        let config = Config::from_env().map_err(|e| PyValueError::new_err(e.to_string()))?;
        let mut options = BatchNormOptions::default();
        if let Some(axes) = axes {
            options.axes = axes.into_iter().collect();
        }
        options.use_population = ids(use_population.unwrap_or_default());
        let gammas = gammas.into_iter().map(tensor).collect::<PyResult<Vec<_>>>()?;
        let betas = betas.into_iter().map(tensor).collect::<PyResult<Vec<_>>>()?;
        graph::apply_batch_normalization(&mut registry.inner, &self.inner, &ids(variables), &gammas, &betas, &options, &config)
            .map(|inner| Self { inner })
            .map_err(to_py_err)
    }
}

#[pyclass(name = "_Function")]
#[derive(Debug, Clone)]
pub struct PyCompiledFunction {
    inner: Function,
}

#[pymethods]
impl PyCompiledFunction {
    pub fn __call__(&mut self, registry: &mut PyRegistry, inputs: Vec<PyTensor>) -> PyResult<Vec<PyTensor>> {
        let inputs = inputs.into_iter().map(tensor).collect::<PyResult<Vec<_>>>()?;
        let outputs = self.inner.call(&mut registry.inner, &inputs).map_err(to_py_err)?;
        Ok(outputs.iter().map(py_tensor).collect())
    }

    pub fn invocations(&self) -> u64 { self.inner.invocations() }
}
