//! Normalizes LIS visit payloads into per-status, per-test-code indexes.

use std::collections::{BTreeMap, HashMap};

use crate::domain::models::{LisBucket, LisNode, LisResult, LisVisitPayload};

/// Top-level entries of one status bucket, keyed by test code.
///
/// A repeated test code replaces the earlier entry but keeps its position.
#[derive(Debug, Clone, Default)]
pub struct BucketEntries {
    entries: Vec<LisNode>,
    index: HashMap<String, usize>,
}

impl BucketEntries {
    fn insert(&mut self, node: LisNode) {
        let code = node.test_code().to_string();
        match self.index.get(&code) {
            Some(&position) => self.entries[position] = node,
            None => {
                self.index.insert(code, self.entries.len());
                self.entries.push(node);
            }
        }
    }

    /// Entry for `test_code`.
    pub fn get(&self, test_code: &str) -> Option<&LisNode> {
        self.index.get(test_code).map(|&position| &self.entries[position])
    }

    /// Whether `test_code` has an entry.
    pub fn contains(&self, test_code: &str) -> bool {
        self.index.contains_key(test_code)
    }

    /// Entries in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &LisNode> {
        self.entries.iter()
    }

    /// Test codes in arrival order.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(LisNode::test_code)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Leaf investigations flattened out of one or more result trees.
#[derive(Debug, Clone, Default)]
pub struct FlatInvestigations<'a> {
    order: Vec<&'a str>,
    latest: HashMap<&'a str, &'a LisResult>,
}

impl<'a> FlatInvestigations<'a> {
    /// Flatten `nodes` breadth-first. The last occurrence of a code wins.
    pub fn from_nodes<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = &'a LisNode>,
    {
        let mut flat = Self::default();
        for node in nodes {
            for leaf in node.leaves() {
                flat.push(leaf);
            }
        }
        flat
    }

    fn push(&mut self, leaf: &'a LisResult) {
        let code = leaf.test_code.as_str();
        if self.latest.insert(code, leaf).is_none() {
            self.order.push(code);
        }
    }

    /// Codes in the order they were first seen.
    pub fn codes(&self) -> &[&'a str] {
        &self.order
    }

    /// Latest leaf for `code`.
    pub fn get(&self, code: &str) -> Option<&'a LisResult> {
        self.latest.get(code).copied()
    }

    /// Whether `code` was seen.
    pub fn contains(&self, code: &str) -> bool {
        self.latest.contains_key(code)
    }

    /// Codes with their latest leaf, in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a LisResult)> + '_ {
        self.order.iter().map(|code| (*code, self.latest[code]))
    }

    /// Number of distinct codes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing was flattened.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// A visit payload bucketed by LIS status and test code.
#[derive(Debug, Clone)]
pub struct NormalizedPayload {
    /// Visit the payload belongs to.
    pub visit_id: String,
    /// The payload as received.
    pub payload: LisVisitPayload,
    buckets: BTreeMap<LisBucket, BucketEntries>,
}

impl NormalizedPayload {
    /// Bucket the top-level entries of `payload`. Unsupported entries are skipped; a repeated code keeps the last entry.
    pub fn new(visit_id: impl Into<String>, payload: LisVisitPayload) -> Self {
        let mut buckets: BTreeMap<LisBucket, BucketEntries> = BTreeMap::new();
        for node in &payload.order_info {
            if matches!(node, LisNode::Unsupported { .. }) {
                continue;
            }
            buckets
                .entry(node.header().bucket())
                .or_default()
                .insert(node.clone());
        }
        Self {
            visit_id: visit_id.into(),
            payload,
            buckets,
        }
    }

    /// Non-empty bucket, if any.
    pub fn bucket(&self, bucket: &LisBucket) -> Option<&BucketEntries> {
        self.buckets.get(bucket).filter(|entries| !entries.is_empty())
    }

    /// Whether `bucket` has entries.
    pub fn has_bucket(&self, bucket: &LisBucket) -> bool {
        self.bucket(bucket).is_some()
    }

    /// Entry for `test_code` within `bucket`.
    pub fn entry(&self, bucket: &LisBucket, test_code: &str) -> Option<&LisNode> {
        self.buckets.get(bucket).and_then(|entries| entries.get(test_code))
    }

    /// All buckets in order.
    pub fn buckets(&self) -> impl Iterator<Item = (&LisBucket, &BucketEntries)> {
        self.buckets.iter()
    }

    /// Leaf investigations of every entry in `bucket`.
    pub fn flatten(&self, bucket: &LisBucket) -> FlatInvestigations<'_> {
        self.buckets
            .get(bucket)
            .map(|entries| FlatInvestigations::from_nodes(entries.iter()))
            .unwrap_or_default()
    }

    /// Base64 report carried by the payload, empty when absent.
    pub fn report_pdf(&self) -> &str {
        &self.payload.result_as_pdf
    }
}
