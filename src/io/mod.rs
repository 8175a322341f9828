//! Line-oriented persistence of calibration graphs.
//!
//! Every line is `TAG id-or-ids payload-words…`. Nodes come first, each optionally
//! followed by `FIX id`, then edges, all in insertion order. Edge tags carry one
//! suffix per attached parameter node and one for an information node:
//!
//! ```text
//! NODE_SE2 0 0 0 0
//! FIX 0
//! NODE_SE2 1 1.1 0 0
//! PARAM_V1 2 bias 0 0.05
//! CONSTRAINT_POSES2D_SE2_PV1 0 1 2 1 0 0 1 0 0 1 0 1
//! ```
//!
//! Payload layouts:
//! - SE2: `x y θ`
//! - parameter: `specification index values…`
//! - information node: the diagonal
//! - edge: measurement, then the upper triangle of the information matrix row by row,
//!   omitted when an information node is attached

use crate::core::{
    InformationNode, Measurement, MeasurementKind, Node, NodeKind, NodePayload, ParameterNode,
    ParameterSpecification, ParameterValue,
};
use crate::error::CalibError;
use crate::factors::EdgeKind;
use crate::manifold::SE2;
use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use std::collections::HashMap;
use thiserror::Error;

pub mod g2o;

pub use g2o::{load_graph, G2oLoader, GraphLoader};

/// Errors that can occur during graph file parsing
#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Missing fields: expected {expected}, found {found}")]
    MissingFields { expected: usize, found: usize },

    #[error("{count} words left unread")]
    TrailingWords { count: usize },

    #[error("Graph error: {0}")]
    Graph(#[from] CalibError),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
}

impl IoError {
    /// Attach a line number to a word-level error.
    pub fn at_line(self, line: usize) -> IoError {
        match self {
            IoError::Io(_) | IoError::Parse { .. } => self,
            other => IoError::Parse {
                line,
                message: other.to_string(),
            },
        }
    }
}

/// Split off the first `n` words.
pub(crate) fn take<'w>(words: &'w [&'w str], n: usize) -> Result<(&'w [&'w str], &'w [&'w str]), IoError> {
    if words.len() < n {
        return Err(IoError::MissingFields {
            expected: n,
            found: words.len(),
        });
    }
    Ok(words.split_at(n))
}

pub(crate) fn parse_f64(word: &str) -> Result<f64, IoError> {
    word.parse::<f64>()
        .map_err(|_| IoError::InvalidNumber(word.to_string()))
}

pub(crate) fn parse_usize(word: &str) -> Result<usize, IoError> {
    word.parse::<usize>()
        .map_err(|_| IoError::InvalidNumber(word.to_string()))
}

fn parse_all(words: &[&str]) -> Result<Vec<f64>, IoError> {
    words.iter().map(|word| parse_f64(word)).collect()
}

/// Text serialisation of one element payload.
pub trait ReadWrite {
    /// Overwrite `self` from the front of `words` and return the unread remainder.
    fn read<'w>(&mut self, words: &'w [&'w str]) -> Result<&'w [&'w str], IoError>;

    /// Words that [`ReadWrite::read`] consumes to restore `self`.
    fn write(&self) -> Vec<String>;
}

impl ReadWrite for SE2 {
    fn read<'w>(&mut self, words: &'w [&'w str]) -> Result<&'w [&'w str], IoError> {
        let (head, rest) = take(words, 3)?;
        let values = parse_all(head)?;
        *self = SE2::from_xy_angle(values[0], values[1], values[2]);
        Ok(rest)
    }

    fn write(&self) -> Vec<String> {
        vec![self.x().to_string(), self.y().to_string(), self.angle().to_string()]
    }
}

impl ReadWrite for Vector2<f64> {
    fn read<'w>(&mut self, words: &'w [&'w str]) -> Result<&'w [&'w str], IoError> {
        let (head, rest) = take(words, 2)?;
        let values = parse_all(head)?;
        *self = Vector2::new(values[0], values[1]);
        Ok(rest)
    }

    fn write(&self) -> Vec<String> {
        self.iter().map(f64::to_string).collect()
    }
}

impl ReadWrite for Measurement {
    fn read<'w>(&mut self, words: &'w [&'w str]) -> Result<&'w [&'w str], IoError> {
        match self {
            Measurement::Transformation(pose) => pose.read(words),
            Measurement::Translation(translation) => translation.read(words),
        }
    }

    fn write(&self) -> Vec<String> {
        match self {
            Measurement::Transformation(pose) => pose.write(),
            Measurement::Translation(translation) => translation.write(),
        }
    }
}

/// Symmetric information matrix stored as its upper triangle.
impl ReadWrite for DMatrix<f64> {
    fn read<'w>(&mut self, words: &'w [&'w str]) -> Result<&'w [&'w str], IoError> {
        let dim = self.nrows();
        let (head, rest) = take(words, dim * (dim + 1) / 2)?;
        let values = parse_all(head)?;
        let mut k = 0;
        for i in 0..dim {
            for j in i..dim {
                self[(i, j)] = values[k];
                self[(j, i)] = values[k];
                k += 1;
            }
        }
        Ok(rest)
    }

    fn write(&self) -> Vec<String> {
        let dim = self.nrows();
        (0..dim)
            .flat_map(|i| (i..dim).map(move |j| (i, j)))
            .map(|(i, j)| self[(i, j)].to_string())
            .collect()
    }
}

impl ReadWrite for ParameterNode {
    fn read<'w>(&mut self, words: &'w [&'w str]) -> Result<&'w [&'w str], IoError> {
        let (head, rest) = take(words, 2)?;
        let specification: ParameterSpecification = head[0].parse()?;
        let index = parse_usize(head[1])?;
        let (values, rest) = take(rest, self.value().dim())?;
        let values = parse_all(values)?;
        let value = match self.value() {
            ParameterValue::V1(_) => ParameterValue::V1(values[0]),
            ParameterValue::V2(_) => ParameterValue::V2(Vector2::new(values[0], values[1])),
            ParameterValue::V3(_) => {
                ParameterValue::V3(Vector3::new(values[0], values[1], values[2]))
            }
            ParameterValue::SE2(_) => {
                ParameterValue::SE2(SE2::from_xy_angle(values[0], values[1], values[2]))
            }
        };
        *self = ParameterNode::new(specification, index, value)?;
        Ok(rest)
    }

    fn write(&self) -> Vec<String> {
        let mut words = vec![self.specification().to_string(), self.index().to_string()];
        match self.value() {
            ParameterValue::V1(v) => words.push(v.to_string()),
            ParameterValue::V2(v) => words.extend(v.iter().map(f64::to_string)),
            ParameterValue::V3(v) => words.extend(v.iter().map(f64::to_string)),
            ParameterValue::SE2(pose) => words.extend(pose.write()),
        }
        words
    }
}

impl ReadWrite for InformationNode {
    fn read<'w>(&mut self, words: &'w [&'w str]) -> Result<&'w [&'w str], IoError> {
        let (head, rest) = take(words, self.dim())?;
        *self = InformationNode::new(DVector::from_vec(parse_all(head)?))?;
        Ok(rest)
    }

    fn write(&self) -> Vec<String> {
        self.diagonal().iter().map(f64::to_string).collect()
    }
}

impl ReadWrite for NodePayload {
    fn read<'w>(&mut self, words: &'w [&'w str]) -> Result<&'w [&'w str], IoError> {
        match self {
            NodePayload::Pose(pose) => pose.read(words),
            NodePayload::Point(point) => point.read(words),
            NodePayload::Parameter(parameter) => parameter.read(words),
            NodePayload::Information(information) => information.read(words),
        }
    }

    fn write(&self) -> Vec<String> {
        match self {
            NodePayload::Pose(pose) => pose.write(),
            NodePayload::Point(point) => point.write(),
            NodePayload::Parameter(parameter) => parameter.write(),
            NodePayload::Information(information) => information.write(),
        }
    }
}

/// Shape of a parameter payload, as encoded in tags and suffixes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParameterShape {
    V1,
    V2,
    V3,
    SE2,
}

impl ParameterShape {
    pub fn of(value: &ParameterValue) -> Self {
        match value {
            ParameterValue::V1(_) => ParameterShape::V1,
            ParameterValue::V2(_) => ParameterShape::V2,
            ParameterValue::V3(_) => ParameterShape::V3,
            ParameterValue::SE2(_) => ParameterShape::SE2,
        }
    }

    /// Placeholder payload to be overwritten by [`ReadWrite::read`].
    fn template(&self) -> Result<ParameterNode, CalibError> {
        match self {
            ParameterShape::V1 => {
                ParameterNode::new(ParameterSpecification::Bias, 0, ParameterValue::V1(0.0))
            }
            ParameterShape::V2 => ParameterNode::new(
                ParameterSpecification::Bias,
                0,
                ParameterValue::V2(Vector2::zeros()),
            ),
            ParameterShape::V3 => ParameterNode::new(
                ParameterSpecification::Scale,
                0,
                ParameterValue::V3(Vector3::repeat(1.0)),
            ),
            ParameterShape::SE2 => ParameterNode::new(
                ParameterSpecification::Bias,
                0,
                ParameterValue::SE2(SE2::identity()),
            ),
        }
    }
}

/// Node types addressable by a tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeTag {
    Pose,
    Point,
    Parameter(ParameterShape),
    Information(usize),
}

impl NodeTag {
    pub fn of(payload: &NodePayload) -> Self {
        match payload {
            NodePayload::Pose(_) => NodeTag::Pose,
            NodePayload::Point(_) => NodeTag::Point,
            NodePayload::Parameter(parameter) => {
                NodeTag::Parameter(ParameterShape::of(parameter.value()))
            }
            NodePayload::Information(information) => NodeTag::Information(information.dim()),
        }
    }

    /// Blank node of this type.
    pub fn template(&self, id: usize) -> Result<Node, CalibError> {
        let payload = match self {
            NodeTag::Pose => NodePayload::Pose(SE2::identity()),
            NodeTag::Point => NodePayload::Point(Vector2::zeros()),
            NodeTag::Parameter(shape) => NodePayload::Parameter(shape.template()?),
            NodeTag::Information(dim) => NodePayload::Information(InformationNode::identity(*dim)?),
        };
        let name = match self {
            NodeTag::Pose => NodeKind::Pose,
            NodeTag::Point => NodeKind::Point,
            NodeTag::Parameter(_) => NodeKind::Parameter,
            NodeTag::Information(_) => NodeKind::Information,
        };
        Ok(Node::new(id, name.to_string(), payload))
    }
}

/// Edge tag suffix: one attached non-spatial node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Suffix {
    Parameter(ParameterShape),
    Information(usize),
}

impl Suffix {
    /// Suffix describing `node`, if it may be attached to an edge beyond its endpoints.
    pub fn of(node: &Node) -> Option<Suffix> {
        match NodeTag::of(node.payload()) {
            NodeTag::Parameter(shape) => Some(Suffix::Parameter(shape)),
            NodeTag::Information(dim) => Some(Suffix::Information(dim)),
            _ => None,
        }
    }
}

/// Explicit mapping between tags and element types.
///
/// Built once by the caller and passed by reference to every load and write.
#[derive(Clone, Debug, Default)]
pub struct TagRegistry {
    nodes: HashMap<String, NodeTag>,
    node_tags: HashMap<NodeTag, String>,
    edges: HashMap<String, EdgeKind>,
    edge_tags: HashMap<EdgeKind, String>,
    suffixes: HashMap<String, Suffix>,
    suffix_tags: HashMap<Suffix, String>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in element type.
    pub fn standard() -> Self {
        let mut registry = TagRegistry::new();

        registry.register_edge("CONSTRAINT_POSES2D_SE2", EdgeKind::PosePose);
        registry.register_edge("CONSTRAINT_POSE2D_V2", EdgeKind::PosePrior);
        registry.register_edge("CONSTRAINT_POSEPOINT2D_V2", EdgeKind::PosePoint);

        registry.register_node("NODE_SE2", NodeTag::Pose);
        registry.register_node("NODE_V2", NodeTag::Point);
        registry.register_node("PARAM_SE2", NodeTag::Parameter(ParameterShape::SE2));
        registry.register_node("PARAM_V1", NodeTag::Parameter(ParameterShape::V1));
        registry.register_node("PARAM_V2", NodeTag::Parameter(ParameterShape::V2));
        registry.register_node("PARAM_V3", NodeTag::Parameter(ParameterShape::V3));
        registry.register_node("INFO_D2", NodeTag::Information(2));
        registry.register_node("INFO_D3", NodeTag::Information(3));

        registry.register_suffix("PSE2", Suffix::Parameter(ParameterShape::SE2));
        registry.register_suffix("PV1", Suffix::Parameter(ParameterShape::V1));
        registry.register_suffix("PV2", Suffix::Parameter(ParameterShape::V2));
        registry.register_suffix("PV3", Suffix::Parameter(ParameterShape::V3));
        registry.register_suffix("ID2", Suffix::Information(2));
        registry.register_suffix("ID3", Suffix::Information(3));

        registry
    }

    pub fn register_node(&mut self, tag: &str, node: NodeTag) {
        self.nodes.insert(tag.to_string(), node);
        self.node_tags.insert(node, tag.to_string());
    }

    pub fn register_edge(&mut self, tag: &str, kind: EdgeKind) {
        self.edges.insert(tag.to_string(), kind);
        self.edge_tags.insert(kind, tag.to_string());
    }

    pub fn register_suffix(&mut self, suffix: &str, value: Suffix) {
        self.suffixes.insert(suffix.to_string(), value);
        self.suffix_tags.insert(value, suffix.to_string());
    }

    pub fn node_type(&self, tag: &str) -> Option<NodeTag> {
        self.nodes.get(tag).copied()
    }

    /// Split an edge tag into its kind and suffixes.
    ///
    /// The shortest registered prefix (on `_` boundaries) names the edge kind; every
    /// remaining word must be a registered suffix.
    pub fn edge_type(&self, tag: &str) -> Result<(EdgeKind, Vec<Suffix>), IoError> {
        let words: Vec<&str> = tag.split('_').collect();
        for i in 0..words.len() {
            let prefix = words[..=i].join("_");
            if let Some(kind) = self.edges.get(&prefix) {
                let suffixes = words[i + 1..]
                    .iter()
                    .map(|word| {
                        self.suffixes
                            .get(*word)
                            .copied()
                            .ok_or_else(|| IoError::UnknownTag(format!("{tag} (suffix {word})")))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok((*kind, suffixes));
            }
        }
        Err(IoError::UnknownTag(tag.to_string()))
    }

    pub fn node_tag(&self, node: &Node) -> Result<&str, IoError> {
        let tag = NodeTag::of(node.payload());
        self.node_tags
            .get(&tag)
            .map(String::as_str)
            .ok_or_else(|| IoError::UnknownTag(format!("{tag:?}")))
    }

    /// Full tag of an edge, suffixes included.
    pub fn edge_tag(&self, edge: &crate::core::Edge) -> Result<String, IoError> {
        let mut words = vec![self
            .edge_tags
            .get(&edge.kind())
            .cloned()
            .ok_or_else(|| IoError::UnknownTag(edge.kind().to_string()))?];
        for node in edge.parameters().iter().chain(edge.information()) {
            let node = node.borrow();
            let suffix = Suffix::of(&node)
                .and_then(|suffix| self.suffix_tags.get(&suffix))
                .ok_or_else(|| IoError::UnknownTag(format!("suffix for node {}", node.id())))?;
            words.push(suffix.clone());
        }
        Ok(words.join("_"))
    }
}

/// Blank measurement of a kind, to be overwritten by [`ReadWrite::read`].
pub(crate) fn measurement_template(kind: MeasurementKind) -> Measurement {
    match kind {
        MeasurementKind::Transformation => Measurement::Transformation(SE2::identity()),
        MeasurementKind::Translation => Measurement::Translation(Vector2::zeros()),
    }
}
