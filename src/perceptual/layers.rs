//! Named stages of the VGG19 feature stack.
//!
//! Every convolution, activation and pooling stage has a stable name
//! (`conv3_2`, `relu4_1`, `pool5`). Style and content layer sets are
//! expressed in these names, and feature capture is keyed by them.

use std::fmt;
use std::str::FromStr;

use crate::error::{StyleError, StyleResult};

/// What a stage does to the tensor flowing through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Conv,
    Relu,
    Pool,
}

/// One stage of the feature stack. Ordering follows network depth, so
/// `relu1_1 < relu3_2 < pool5`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(u8);

struct LayerSpec {
    name: &'static str,
    kind: LayerKind,
    block: usize,
    channels: usize,
}

const fn stage(
    name: &'static str,
    kind: LayerKind,
    block: usize,
    channels: usize,
) -> LayerSpec {
    LayerSpec {
        name,
        kind,
        block,
        channels,
    }
}

/// The 37 stages of VGG19's convolutional trunk, in forward order.
/// Pooling stages are average pools here, hence `pool{n}` rather than
/// any operator-specific name.
static CATALOG: [LayerSpec; 37] = [
    stage("conv1_1", LayerKind::Conv, 1, 64),
    stage("relu1_1", LayerKind::Relu, 1, 64),
    stage("conv1_2", LayerKind::Conv, 1, 64),
    stage("relu1_2", LayerKind::Relu, 1, 64),
    stage("pool1", LayerKind::Pool, 1, 64),
    stage("conv2_1", LayerKind::Conv, 2, 128),
    stage("relu2_1", LayerKind::Relu, 2, 128),
    stage("conv2_2", LayerKind::Conv, 2, 128),
    stage("relu2_2", LayerKind::Relu, 2, 128),
    stage("pool2", LayerKind::Pool, 2, 128),
    stage("conv3_1", LayerKind::Conv, 3, 256),
    stage("relu3_1", LayerKind::Relu, 3, 256),
    stage("conv3_2", LayerKind::Conv, 3, 256),
    stage("relu3_2", LayerKind::Relu, 3, 256),
    stage("conv3_3", LayerKind::Conv, 3, 256),
    stage("relu3_3", LayerKind::Relu, 3, 256),
    stage("conv3_4", LayerKind::Conv, 3, 256),
    stage("relu3_4", LayerKind::Relu, 3, 256),
    stage("pool3", LayerKind::Pool, 3, 256),
    stage("conv4_1", LayerKind::Conv, 4, 512),
    stage("relu4_1", LayerKind::Relu, 4, 512),
    stage("conv4_2", LayerKind::Conv, 4, 512),
    stage("relu4_2", LayerKind::Relu, 4, 512),
    stage("conv4_3", LayerKind::Conv, 4, 512),
    stage("relu4_3", LayerKind::Relu, 4, 512),
    stage("conv4_4", LayerKind::Conv, 4, 512),
    stage("relu4_4", LayerKind::Relu, 4, 512),
    stage("pool4", LayerKind::Pool, 4, 512),
    stage("conv5_1", LayerKind::Conv, 5, 512),
    stage("relu5_1", LayerKind::Relu, 5, 512),
    stage("conv5_2", LayerKind::Conv, 5, 512),
    stage("relu5_2", LayerKind::Relu, 5, 512),
    stage("conv5_3", LayerKind::Conv, 5, 512),
    stage("relu5_3", LayerKind::Relu, 5, 512),
    stage("conv5_4", LayerKind::Conv, 5, 512),
    stage("relu5_4", LayerKind::Relu, 5, 512),
    stage("pool5", LayerKind::Pool, 5, 512),
];

/// (in, out) channel counts for the 16 convolutions, in forward order.
/// Shared by network construction and the weight file layout.
pub(crate) const CONV_CHANNELS: [(usize, usize); 16] = [
    (3, 64),
    (64, 64),
    (64, 128),
    (128, 128),
    (128, 256),
    (256, 256),
    (256, 256),
    (256, 256),
    (256, 512),
    (512, 512),
    (512, 512),
    (512, 512),
    (512, 512),
    (512, 512),
    (512, 512),
    (512, 512),
];

impl LayerId {
    pub const RELU1_1: LayerId = LayerId(1);
    pub const RELU2_1: LayerId = LayerId(6);
    pub const RELU3_1: LayerId = LayerId(11);
    pub const RELU3_2: LayerId = LayerId(13);
    pub const RELU4_1: LayerId = LayerId(20);
    pub const RELU5_1: LayerId = LayerId(29);

    /// All stages in forward (depth) order.
    pub fn all() -> impl Iterator<Item = LayerId> {
        (0..CATALOG.len() as u8).map(LayerId)
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn kind(self) -> LayerKind {
        self.spec().kind
    }

    /// Block number, 1 through 5.
    pub fn block(self) -> usize {
        self.spec().block
    }

    /// Channel count of the tensor this stage produces.
    pub fn channels(self) -> usize {
        self.spec().channels
    }

    /// Parse a comma-separated layer list, e.g. `"relu1_1,relu2_1"`.
    pub fn parse_list(text: &str) -> StyleResult<Vec<LayerId>> {
        text.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect()
    }

    fn spec(self) -> &'static LayerSpec {
        &CATALOG[self.0 as usize]
    }
}

/// The style layer set used when the caller does not pick one:
/// the first activation of each block.
pub fn default_style_layers() -> Vec<LayerId> {
    vec![
        LayerId::RELU1_1,
        LayerId::RELU2_1,
        LayerId::RELU3_1,
        LayerId::RELU4_1,
        LayerId::RELU5_1,
    ]
}

/// The content layer set used when the caller does not pick one.
pub fn default_content_layers() -> Vec<LayerId> {
    vec![LayerId::RELU3_2]
}

impl FromStr for LayerId {
    type Err = StyleError;

    fn from_str(s: &str) -> StyleResult<LayerId> {
        CATALOG
            .iter()
            .position(|spec| spec.name == s)
            .map(|idx| LayerId(idx as u8))
            .ok_or_else(|| StyleError::UnknownLayer(s.to_string()))
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn catalog_has_37_unique_stages() {
        let names: BTreeSet<&str> = LayerId::all().map(LayerId::name).collect();
        assert_eq!(LayerId::all().count(), 37);
        assert_eq!(names.len(), 37);
    }

    #[test]
    fn names_round_trip_through_parse() {
        for id in LayerId::all() {
            let parsed: LayerId = id.name().parse().unwrap();
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!("relu6_1".parse::<LayerId>().is_err());
        assert!("maxpool1".parse::<LayerId>().is_err());
        assert!("".parse::<LayerId>().is_err());
    }

    #[test]
    fn ordering_follows_depth() {
        assert!(LayerId::RELU1_1 < LayerId::RELU3_2);
        assert!(LayerId::RELU3_2 < LayerId::RELU5_1);
        let last = LayerId::all().last().unwrap();
        assert_eq!(last.name(), "pool5");
        assert_eq!(last.kind(), LayerKind::Pool);
    }

    #[test]
    fn well_known_ids_match_their_names() {
        assert_eq!(LayerId::RELU1_1.name(), "relu1_1");
        assert_eq!(LayerId::RELU2_1.name(), "relu2_1");
        assert_eq!(LayerId::RELU3_1.name(), "relu3_1");
        assert_eq!(LayerId::RELU3_2.name(), "relu3_2");
        assert_eq!(LayerId::RELU4_1.name(), "relu4_1");
        assert_eq!(LayerId::RELU5_1.name(), "relu5_1");
    }

    #[test]
    fn conv_channels_line_up_with_catalog() {
        let convs: Vec<LayerId> = LayerId::all()
            .filter(|id| id.kind() == LayerKind::Conv)
            .collect();
        assert_eq!(convs.len(), CONV_CHANNELS.len());

        let mut prev_out = 3;
        for (id, (c_in, c_out)) in convs.iter().zip(CONV_CHANNELS) {
            assert_eq!(c_in, prev_out, "input channels of {id}");
            assert_eq!(c_out, id.channels(), "output channels of {id}");
            prev_out = c_out;
        }
    }

    #[test]
    fn default_sets_use_expected_names() {
        let style: Vec<&str> = default_style_layers().iter().map(|l| l.name()).collect();
        assert_eq!(
            style,
            ["relu1_1", "relu2_1", "relu3_1", "relu4_1", "relu5_1"]
        );
        let content: Vec<&str> = default_content_layers()
            .iter()
            .map(|l| l.name())
            .collect();
        assert_eq!(content, ["relu3_2"]);
    }

    #[test]
    fn parse_list_trims_and_collects() {
        let ids = LayerId::parse_list("relu1_1, conv3_2 ,pool5").unwrap();
        let names: Vec<&str> = ids.iter().map(|l| l.name()).collect();
        assert_eq!(names, ["relu1_1", "conv3_2", "pool5"]);
        assert!(LayerId::parse_list("relu1_1,bogus").is_err());
    }

    #[test]
    fn catalog_listing_is_stable() {
        let listing = LayerId::all()
            .map(|id| format!("{} {:?} {}", id.name(), id.kind(), id.channels()))
            .collect::<Vec<_>>()
            .join("\n");
        insta::assert_snapshot!(listing, @r###"
        conv1_1 Conv 64
        relu1_1 Relu 64
        conv1_2 Conv 64
        relu1_2 Relu 64
        pool1 Pool 64
        conv2_1 Conv 128
        relu2_1 Relu 128
        conv2_2 Conv 128
        relu2_2 Relu 128
        pool2 Pool 128
        conv3_1 Conv 256
        relu3_1 Relu 256
        conv3_2 Conv 256
        relu3_2 Relu 256
        conv3_3 Conv 256
        relu3_3 Relu 256
        conv3_4 Conv 256
        relu3_4 Relu 256
        pool3 Pool 256
        conv4_1 Conv 512
        relu4_1 Relu 512
        conv4_2 Conv 512
        relu4_2 Relu 512
        conv4_3 Conv 512
        relu4_3 Relu 512
        conv4_4 Conv 512
        relu4_4 Relu 512
        pool4 Pool 512
        conv5_1 Conv 512
        relu5_1 Relu 512
        conv5_2 Conv 512
        relu5_2 Relu 512
        conv5_3 Conv 512
        relu5_3 Relu 512
        conv5_4 Conv 512
        relu5_4 Relu 512
        pool5 Pool 512
        "###);
    }
}
