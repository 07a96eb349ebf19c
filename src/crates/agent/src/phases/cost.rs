//! Phase 4: price the stable implementation graph.

use async_stream::stream;

use infra_graph::GraphState;

use crate::cost::{annotate, CostTable};
use crate::events::AgentEvent;
use crate::phases::{PhaseItem, PhaseStream};

/// Run the cost phase: annotate the graph's metadata with the estimate
/// and a fresh architecture version id.
pub fn run_cost(table: CostTable, mut graph: GraphState) -> PhaseStream {
    Box::pin(stream! {
        yield PhaseItem::Event(AgentEvent::log("Calculating monthly cost estimate..."));
        let report = annotate(&table, &mut graph);
        yield PhaseItem::Event(AgentEvent::thought(format!("Estimated cost: {}", report.total)));
        yield PhaseItem::Terminal(graph);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use futures::StreamExt;
    use infra_graph::{GraphPhase, Resource};

    #[tokio::test]
    async fn cost_phase_annotates_metadata() {
        let mut graph = GraphState::empty(GraphPhase::Implementation);
        graph.resources.push(Resource::new("web", "aws_instance"));
        graph.resources.push(Resource::new("db", "aws_db_instance"));

        let mut stream = run_cost(CostTable::default(), graph);
        let mut terminal = None;
        let mut thought = None;
        while let Some(item) = stream.next().await {
            match item {
                PhaseItem::Event(e) if e.kind == EventKind::Thought => thought = Some(e),
                PhaseItem::Event(_) => {}
                PhaseItem::Terminal(g) => terminal = Some(g),
            }
        }

        let graph = terminal.unwrap();
        assert_eq!(graph.metadata["cost_estimate"], "$100/mo");
        assert!(thought
            .unwrap()
            .content
            .as_str()
            .unwrap()
            .contains("$100/mo"));
    }
}
