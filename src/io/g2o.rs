use super::*;
use crate::core::{Edge, FactorGraph, NodeId};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Line count above which lines are parsed in parallel.
const PARALLEL_THRESHOLD: usize = 5000;

/// Trait for graph file loaders and writers
pub trait GraphLoader {
    /// Load a graph from a file
    fn load<P: AsRef<Path>>(path: P, registry: &TagRegistry) -> Result<FactorGraph, IoError>;

    /// Write a graph to a file
    fn write<P: AsRef<Path>>(graph: &FactorGraph, path: P, registry: &TagRegistry) -> Result<(), IoError>;
}

/// Memory-mapped loader for tagged graph files
pub struct G2oLoader;

/// Edge line parsed without touching the graph.
#[derive(Debug)]
struct ParsedEdge {
    kind: EdgeKind,
    suffixes: Vec<Suffix>,
    ids: Vec<NodeId>,
    measurement: Measurement,
    information: Option<DMatrix<f64>>,
}

#[derive(Debug)]
enum ParsedLine {
    Node(Node),
    Fix(NodeId),
    Edge(ParsedEdge),
}

impl GraphLoader for G2oLoader {
    fn load<P: AsRef<Path>>(path: P, registry: &TagRegistry) -> Result<FactorGraph, IoError> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the mapping is read-only and dropped before returning.
        let mmap = unsafe { Mmap::map(&file)? };
        let content = std::str::from_utf8(&mmap).map_err(|e| IoError::Parse {
            line: 0,
            message: format!("Invalid UTF-8: {e}"),
        })?;

        let graph = Self::parse_content(content, registry)?;
        info!(
            path = %path.as_ref().display(),
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            "loaded graph"
        );
        Ok(graph)
    }

    fn write<P: AsRef<Path>>(graph: &FactorGraph, path: P, registry: &TagRegistry) -> Result<(), IoError> {
        let lines = Self::format_graph(graph, registry)?;
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        for line in &lines {
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        info!(path = %path.as_ref().display(), lines = lines.len(), "wrote graph");
        Ok(())
    }
}

impl G2oLoader {
    /// Parse file content into a graph.
    pub fn parse_content(content: &str, registry: &TagRegistry) -> Result<FactorGraph, IoError> {
        let lines: Vec<&str> = content.lines().collect();

        let parsed: Vec<(usize, Option<ParsedLine>)> = if lines.len() > PARALLEL_THRESHOLD {
            debug!(lines = lines.len(), "parsing in parallel");
            lines
                .par_iter()
                .enumerate()
                .map(|(index, line)| {
                    Self::parse_line(line, registry)
                        .map(|item| (index + 1, item))
                        .map_err(|e| e.at_line(index + 1))
                })
                .collect::<Result<_, _>>()?
        } else {
            lines
                .iter()
                .enumerate()
                .map(|(index, line)| {
                    Self::parse_line(line, registry)
                        .map(|item| (index + 1, item))
                        .map_err(|e| e.at_line(index + 1))
                })
                .collect::<Result<_, _>>()?
        };

        // Sequential insertion keeps ids and edge order deterministic
        let mut graph = FactorGraph::new();
        for (line, item) in parsed {
            if let Some(item) = item {
                Self::insert(&mut graph, item).map_err(|e| e.at_line(line))?;
            }
        }
        Ok(graph)
    }

    /// Parse one line; `None` for blanks and comments.
    fn parse_line(line: &str, registry: &TagRegistry) -> Result<Option<ParsedLine>, IoError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let (tag, words) = (parts[0], &parts[1..]);

        if tag == "FIX" {
            let (id, rest) = take(words, 1)?;
            check_consumed(rest)?;
            return Ok(Some(ParsedLine::Fix(parse_usize(id[0])?)));
        }

        if let Some(node_tag) = registry.node_type(tag) {
            let (id, rest) = take(words, 1)?;
            let mut node = node_tag.template(parse_usize(id[0])?)?;
            let rest = node.payload_mut().read(rest)?;
            check_consumed(rest)?;
            return Ok(Some(ParsedLine::Node(node)));
        }

        let (kind, suffixes) = registry.edge_type(tag)?;
        Self::parse_edge(kind, suffixes, words).map(|edge| Some(ParsedLine::Edge(edge)))
    }

    fn parse_edge(kind: EdgeKind, suffixes: Vec<Suffix>, words: &[&str]) -> Result<ParsedEdge, IoError> {
        let (ids, rest) = take(words, kind.cardinality() + suffixes.len())?;
        let ids = ids
            .iter()
            .map(|word| parse_usize(word))
            .collect::<Result<Vec<_>, _>>()?;

        let mut measurement = measurement_template(kind.measurement_kind());
        let mut rest = measurement.read(rest)?;

        let has_information_node = suffixes
            .iter()
            .any(|suffix| matches!(suffix, Suffix::Information(_)));
        let information = if has_information_node {
            None
        } else {
            let mut matrix = DMatrix::identity(kind.dim(), kind.dim());
            rest = matrix.read(rest)?;
            Some(matrix)
        };
        check_consumed(rest)?;

        Ok(ParsedEdge {
            kind,
            suffixes,
            ids,
            measurement,
            information,
        })
    }

    fn insert(graph: &mut FactorGraph, item: ParsedLine) -> Result<(), IoError> {
        match item {
            ParsedLine::Node(node) => {
                graph.add_node(node)?;
            }
            ParsedLine::Fix(id) => {
                let node = graph
                    .node(id)
                    .ok_or(CalibError::DanglingReference { id })?;
                node.borrow_mut().fix();
            }
            ParsedLine::Edge(parsed) => {
                let name = parsed.kind.to_string();
                let mut edge = match parsed.information {
                    Some(matrix) => Edge::with_information(parsed.kind, name, parsed.measurement, matrix)?,
                    None => Edge::new(parsed.kind, name, parsed.measurement)?,
                };
                let cardinality = parsed.kind.cardinality();
                for (position, id) in parsed.ids.iter().enumerate() {
                    let node = graph
                        .node(*id)
                        .cloned()
                        .ok_or(CalibError::DanglingReference { id: *id })?;
                    if position >= cardinality {
                        let expected = parsed.suffixes[position - cardinality];
                        if Suffix::of(&node.borrow()) != Some(expected) {
                            return Err(IoError::UnknownTag(format!(
                                "node {id} does not match suffix {expected:?}"
                            )));
                        }
                    }
                    edge.add_node(node)?;
                }
                graph.add_edge(edge)?;
            }
        }
        Ok(())
    }

    /// Lines describing `graph`, nodes first.
    pub fn format_graph(graph: &FactorGraph, registry: &TagRegistry) -> Result<Vec<String>, IoError> {
        let mut lines = Vec::with_capacity(graph.num_nodes() + graph.num_edges());
        for node in graph.nodes() {
            let node = node.borrow();
            let mut words = vec![registry.node_tag(&node)?.to_string(), node.id().to_string()];
            words.extend(node.payload().write());
            lines.push(words.join(" "));
            if node.is_fixed() {
                lines.push(format!("FIX {}", node.id()));
            }
        }
        for edge in graph.edges() {
            let edge = edge.borrow();
            let mut words = vec![registry.edge_tag(&edge)?];
            words.extend(edge.node_ids().iter().map(ToString::to_string));
            words.extend(edge.measurement().write());
            if edge.information().is_none() {
                words.extend(edge.information_matrix().write());
            }
            lines.push(words.join(" "));
        }
        Ok(lines)
    }
}

fn check_consumed(rest: &[&str]) -> Result<(), IoError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(IoError::TrailingWords { count: rest.len() })
    }
}

/// Load a graph file, choosing the loader by extension.
pub fn load_graph<P: AsRef<Path>>(path: P, registry: &TagRegistry) -> Result<FactorGraph, IoError> {
    let path_ref = path.as_ref();
    let extension = path_ref
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| IoError::UnsupportedFormat("No file extension".to_string()))?;

    match extension.to_lowercase().as_str() {
        "g2o" | "graph" => G2oLoader::load(path, registry),
        _ => Err(IoError::UnsupportedFormat(format!(
            "Unsupported extension: {extension}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeKind;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    const TOLERANCE: f64 = 1e-12;

    const SAMPLE: &str = "\
# calibration graph
NODE_SE2 0 0 0 0
FIX 0
NODE_SE2 1 1.1 0 0
NODE_V2 2 2 1
PARAM_V1 3 bias 0 0.05
INFO_D2 4 2 3
CONSTRAINT_POSES2D_SE2_PV1 0 1 3 1 0 0 1 0 0 1 0 1
CONSTRAINT_POSEPOINT2D_V2_ID2 1 2 4 0.9 1
CONSTRAINT_POSE2D_V2 1 1 0 4 0 4
";

    fn write_sample(extension: &str) -> tempfile::TempPath {
        let mut file = tempfile::Builder::new()
            .suffix(extension)
            .tempfile()
            .unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file.into_temp_path()
    }

    #[test]
    fn test_g2o_load_sample() {
        let path = write_sample(".g2o");
        let graph = load_graph(&path, &TagRegistry::standard()).unwrap();

        assert_eq!(graph.num_nodes(), 5);
        assert_eq!(graph.num_edges(), 3);
        assert!(graph.node(0).unwrap().borrow().is_fixed());
        assert!(!graph.node(1).unwrap().borrow().is_fixed());
        assert_eq!(graph.nodes_of_kind(NodeKind::Parameter).len(), 1);

        let odometry = graph.edge(0).unwrap().borrow();
        assert_eq!(odometry.kind(), EdgeKind::PosePose);
        assert_eq!(odometry.parameter_ids(), vec![3]);
        let observation = graph.edge(1).unwrap().borrow();
        assert_eq!(observation.information().unwrap().borrow().id(), 4);
        let prior = graph.edge(2).unwrap().borrow();
        assert!((prior.information_matrix()[(0, 0)] - 4.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_g2o_round_trip_preserves_cost() {
        let registry = TagRegistry::standard();
        let path = write_sample(".g2o");
        let graph = G2oLoader::load(&path, &registry).unwrap();

        let output = NamedTempFile::new().unwrap().into_temp_path();
        G2oLoader::write(&graph, &output, &registry).unwrap();
        let reloaded = G2oLoader::load(&output, &registry).unwrap();

        assert!(graph.is_equivalent(&reloaded));
        assert!((graph.cost().unwrap() - reloaded.cost().unwrap()).abs() < TOLERANCE);
        assert_eq!(
            G2oLoader::format_graph(&graph, &registry).unwrap(),
            G2oLoader::format_graph(&reloaded, &registry).unwrap()
        );
    }

    #[test]
    fn test_g2o_errors_carry_line_numbers() {
        let registry = TagRegistry::standard();
        let error = G2oLoader::parse_content("NODE_SE2 0 0 0 0\nNODE_SE2 1 x 0 0\n", &registry)
            .unwrap_err();
        assert!(matches!(error, IoError::Parse { line: 2, .. }));

        let error = G2oLoader::parse_content("NODE_SE2 0 0 0 0 9\n", &registry).unwrap_err();
        assert!(error.to_string().contains("left unread"));

        let error = G2oLoader::parse_content(
            "NODE_SE2 0 0 0 0\nCONSTRAINT_POSES2D_SE2 0 7 1 0 0 1 0 0 1 0 1\n",
            &registry,
        )
        .unwrap_err();
        assert!(matches!(error, IoError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_g2o_rejects_mismatched_suffix() {
        let registry = TagRegistry::standard();
        let content = "\
NODE_SE2 0 0 0 0
NODE_SE2 1 1 0 0
PARAM_V2 2 bias 0 0 0
CONSTRAINT_POSES2D_SE2_PV1 0 1 2 1 0 0 1 0 0 1 0 1
";
        assert!(G2oLoader::parse_content(content, &registry).is_err());
    }

    #[test]
    fn test_g2o_unsupported_extension() {
        let path = write_sample(".csv");
        assert!(matches!(
            load_graph(&path, &TagRegistry::standard()),
            Err(IoError::UnsupportedFormat(_))
        ));
    }
}
