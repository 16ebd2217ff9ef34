use enumset::EnumSet;
use proptest::prelude::*;

use graft_ir::OpKind;
use graft_ir::test::property::generators::arb_elementwise_graph;

use crate::config::PipelineConfig;
use crate::fusion::FusionPass;
use crate::pass::{GraphPass, Pipeline};
use crate::reshape::ReshapeElimination;
use crate::test::helpers::assert_same_values;

proptest! {
    #[test]
    fn test_reshape_elimination_clears_barriers(graph in arb_elementwise_graph(16)) {
        let mut rewritten = graph.clone();
        let pass = ReshapeElimination::new().unwrap();

        pass.run(&mut rewritten).unwrap();
        let again = pass.run(&mut rewritten).unwrap();

        prop_assert_eq!(again.applied_count(), 0);
        prop_assert_eq!(rewritten.count_live(OpKind::Reshape), 0);
        prop_assert_eq!(rewritten.results().len(), graph.results().len());
        assert_same_values(&graph, &rewritten);
    }

    #[test]
    fn test_fusion_sweep_is_idempotent(graph in arb_elementwise_graph(16)) {
        let mut rewritten = graph.clone();
        let pass = FusionPass::new(EnumSet::all()).unwrap();

        pass.run(&mut rewritten).unwrap();
        let again = pass.run(&mut rewritten).unwrap();

        prop_assert_eq!(again.applied_count(), 0);
        assert_same_values(&graph, &rewritten);
    }

    #[test]
    fn test_default_pipeline_preserves_values(graph in arb_elementwise_graph(16)) {
        let mut rewritten = graph.clone();
        let pipeline = Pipeline::from_config(&PipelineConfig::default()).unwrap();

        let report = pipeline.run(&mut rewritten).unwrap();

        prop_assert!(report.rejected.is_empty());
        for (before, after) in graph.results().iter().zip(rewritten.results()) {
            prop_assert_eq!(graph.output_type(*before).unwrap(), rewritten.output_type(*after).unwrap());
        }
        assert_same_values(&graph, &rewritten);
    }
}
