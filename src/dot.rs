//! Graphviz export of the target graph.
//!
//! Nodes are targets labelled with their kind; edges run from producer to
//! consumer and carry the relation that created them. Default targets are
//! drawn with a double border.

use std::fmt::{self, Display, Formatter};

use itertools::Itertools;

use crate::graph::BuildGraph;

/// Render `graph` as a DOT digraph.
///
/// # Examples
/// ```rust
/// use camino::Utf8Path;
/// use kumiki::{description, dot, graph::BuildGraph};
///
/// let description = description::from_str(concat!(
///     "kumiki_version: \"1.0.0\"\n",
///     "targets:\n",
///     "  - name: app\n    kind: executable\n    sources: main.c\n",
/// ))
/// .expect("description");
/// let graph = BuildGraph::from_description(&description, Utf8Path::new("build"))
///     .expect("graph");
/// assert!(dot::generate(&graph).starts_with("digraph kumiki {"));
/// ```
#[must_use]
pub fn generate(graph: &BuildGraph) -> String {
    DisplayGraph { graph }.to_string()
}

struct DisplayGraph<'g> {
    graph: &'g BuildGraph,
}

impl Display for DisplayGraph<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "digraph kumiki {{")?;
        writeln!(f, "  rankdir=LR;")?;
        for target in self.graph.targets() {
            let border = if self.graph.defaults().contains(&target.id) {
                ", peripheries=2"
            } else {
                ""
            };
            writeln!(
                f,
                "  \"{name}\" [label=\"{name}\\n{kind}\"{border}];",
                name = escape(&target.name),
                kind = target.kind.label(),
            )?;
        }
        let edges = self
            .graph
            .edges()
            .iter()
            .sorted_by_key(|edge| (edge.producer, edge.consumer, edge.kind));
        for edge in edges {
            writeln!(
                f,
                "  \"{}\" -> \"{}\" [label=\"{}\"];",
                escape(self.graph.name(edge.producer)),
                escape(self.graph.name(edge.consumer)),
                edge.kind.label()
            )?;
        }
        writeln!(f, "}}")
    }
}

/// Escape a name for use inside a double-quoted DOT identifier.
fn escape(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description;
    use camino::Utf8Path;

    fn graph(targets: &str) -> BuildGraph {
        let yaml = format!("kumiki_version: \"1.0.0\"\n{targets}");
        let description = description::from_str(&yaml).expect("description");
        BuildGraph::from_description(&description, Utf8Path::new("build")).expect("graph")
    }

    #[test]
    fn renders_nodes_and_labelled_edges() {
        let graph = graph(concat!(
            "defaults: [app]\n",
            "targets:\n",
            "  - name: util\n    kind: static_library\n    sources: util.c\n",
            "  - name: app\n    kind: executable\n    sources: main.c\n",
            "    link_with: util\n",
            "    objects:\n      - extract_all_objects: util\n",
        ));
        assert_eq!(
            generate(&graph),
            concat!(
                "digraph kumiki {\n",
                "  rankdir=LR;\n",
                "  \"util\" [label=\"util\\nstatic-lib\"];\n",
                "  \"app\" [label=\"app\\nexecutable\", peripheries=2];\n",
                "  \"util\" -> \"app\" [label=\"link\"];\n",
                "  \"util\" -> \"app\" [label=\"objects\"];\n",
                "}\n",
            )
        );
    }

    #[test]
    fn quotes_in_names_are_escaped() {
        assert_eq!(escape("we\"ird"), "we\\\"ird");
    }

    #[test]
    fn empty_graph_is_still_valid_dot() {
        let graph = graph("targets: []\n");
        assert_eq!(generate(&graph), "digraph kumiki {\n  rankdir=LR;\n}\n");
    }
}
