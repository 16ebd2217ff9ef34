use enumset::EnumSet;
use test_case::test_case;

use crate::config::{PipelineConfig, parse_fusions};
use crate::fusion::FusionFamily;

#[test_case("none", Some(EnumSet::empty()))]
#[test_case("0", Some(EnumSet::empty()))]
#[test_case("regular", Some(EnumSet::only(FusionFamily::Regular)))]
#[test_case(" Differentiable ", Some(EnumSet::only(FusionFamily::Differentiable)))]
#[test_case("all", Some(EnumSet::all()))]
#[test_case("1", Some(EnumSet::all()))]
#[test_case("fast", None)]
fn test_fusion_families_parse(value: &str, expected: Option<EnumSet<FusionFamily>>) {
    assert_eq!(parse_fusions(value), expected);
}

#[test]
fn test_builder_defaults_match_default() {
    assert_eq!(PipelineConfig::builder().build(), PipelineConfig::default());
}

#[test]
fn test_builder_overrides() {
    let config = PipelineConfig::builder()
        .fusions(EnumSet::all())
        .min_fuse_size(5)
        .recurrent(false)
        .min_timesteps(4)
        .build();

    assert_eq!(config.fusions, EnumSet::all());
    assert_eq!(config.min_fuse_size, 5);
    assert!(!config.recurrent);
    assert!(config.reshape_elimination);
    assert_eq!(config.min_timesteps, 4);
}
