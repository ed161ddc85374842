// Segment Group Extraction
//
// This module walks the group tree of a message to collect every instance of a
// segment under a group path, and correlates additional segments with each
// instance through their common ancestor group.

use hl7v2_model::{Message, SegmentInstance, StructurePath};
use indexmap::IndexMap;
use log::debug;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A segment reference in template form: `.GROUP.SUBGROUP.SEG` or `SEG`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPath {
    pub group_path: Vec<String>,
    pub segment: String,
}

impl SegmentPath {
    pub fn parse(path: &str) -> Self {
        let mut names: Vec<String> = path
            .trim()
            .trim_start_matches('.')
            .split('.')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        let segment = names.pop().unwrap_or_default();
        Self {
            group_path: names,
            segment,
        }
    }
}

/// A primary segment instance set with its correlated peers
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentGroup {
    segments: Vec<SegmentInstance>,
    additional_segments: IndexMap<String, Vec<SegmentInstance>>,
    group_id: Option<String>,
}

impl SegmentGroup {
    /// Creates a group; `None` when there are no primary segments
    pub fn new(
        segments: Vec<SegmentInstance>,
        additional_segments: IndexMap<String, Vec<SegmentInstance>>,
        group_id: Option<String>,
    ) -> Option<Self> {
        if segments.is_empty() {
            return None;
        }
        Some(Self {
            segments,
            additional_segments,
            group_id,
        })
    }

    pub fn segments(&self) -> &[SegmentInstance] {
        &self.segments
    }

    pub fn additional_segments(&self) -> &IndexMap<String, Vec<SegmentInstance>> {
        &self.additional_segments
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// Name of the primary segment
    pub fn segment_name(&self) -> &str {
        self.segments.first().map(|s| s.name()).unwrap_or("")
    }
}

/// Extracts every correlated instance of `segment`.
///
/// Without a group path the whole message is scanned and one group holds every
/// repetition. Otherwise each instance of the innermost group yields one
/// `SegmentGroup`. The group id names the anchor group: the parent group when a
/// parent path is given, else the innermost primary group.
pub fn extract_segment_groups(
    message: &Message,
    segment: &str,
    primary_group_path: &[String],
    additional_segments: &[SegmentPath],
    parent_group_path: Option<&[String]>,
) -> Vec<SegmentGroup> {
    if primary_group_path.is_empty() {
        let segments = message.find_segments(segment);
        let mut additional = IndexMap::new();
        for peer in additional_segments {
            additional
                .entry(peer.segment.clone())
                .or_insert_with(Vec::new)
                .extend(message.find_segments(&peer.segment));
        }
        return SegmentGroup::new(segments, additional, None).into_iter().collect();
    }

    let anchor_path = match parent_group_path {
        Some(parent) if !parent.is_empty() && primary_group_path.starts_with(parent) => parent,
        Some(parent) if !parent.is_empty() => {
            debug!(
                "Parent group path {:?} is not a prefix of {:?}, anchoring on the primary path",
                parent, primary_group_path
            );
            primary_group_path
        }
        _ => primary_group_path,
    };
    let anchor_name = anchor_path.last().map(String::as_str).unwrap_or("");
    let relative = &primary_group_path[anchor_path.len()..];

    let mut groups = Vec::new();
    for anchor in expand(message, &StructurePath::root(), anchor_path) {
        for group_path in expand(message, &anchor, relative) {
            let segments = match message.segments_in(&group_path, segment) {
                Ok(segments) => segments,
                Err(err) => {
                    debug!("Cannot read {} at {}: {}", segment, group_path, err);
                    continue;
                }
            };
            if segments.is_empty() {
                continue;
            }

            let mut additional = IndexMap::new();
            for peer in additional_segments {
                additional
                    .entry(peer.segment.clone())
                    .or_insert_with(Vec::new)
                    .extend(correlate(message, &group_path, primary_group_path, peer));
            }

            let group_id = group_id(&group_path, anchor_name);
            if let Some(group) = SegmentGroup::new(segments, additional, group_id) {
                groups.push(group);
            }
        }
    }
    groups
}

/// Every instance reachable from `start` by descending `names`, expanding all
/// repetitions at every level
pub fn expand(message: &Message, start: &StructurePath, names: &[String]) -> Vec<StructurePath> {
    let Some((name, rest)) = names.split_first() else {
        return vec![start.clone()];
    };

    let group = match message.group_at(start) {
        Ok(group) => group,
        Err(err) => {
            debug!("Cannot navigate to {}: {}", start, err);
            return Vec::new();
        }
    };

    let repetitions = group.groups(name).len();
    if repetitions == 0 {
        debug!("No {} group under {}", name, start);
    }
    (0..repetitions)
        .flat_map(|rep| expand(message, &start.child(name, rep), rest))
        .collect()
}

/// Finds the peer segments for one primary group instance.
///
/// The common ancestor is the longest shared leading run of group names. Without
/// one, the whole message is searched.
fn correlate(
    message: &Message,
    primary_group: &StructurePath,
    primary_names: &[String],
    peer: &SegmentPath,
) -> Vec<SegmentInstance> {
    let common = primary_names
        .iter()
        .zip(&peer.group_path)
        .take_while(|(a, b)| a == b)
        .count();

    if common == 0 {
        return message.find_segments(&peer.segment);
    }

    let ancestor = primary_group.truncate(common);
    expand(message, &ancestor, &peer.group_path[common..])
        .into_iter()
        .flat_map(|path| match message.segments_in(&path, &peer.segment) {
            Ok(segments) => segments,
            Err(err) => {
                debug!("Cannot read {} at {}: {}", peer.segment, path, err);
                Vec::new()
            }
        })
        .collect()
}

/// Id of the nearest enclosing group whose name ends with `target`
pub fn group_id(path: &StructurePath, target: &str) -> Option<String> {
    if target.is_empty() {
        return None;
    }
    let steps = path.steps();
    let index = steps.iter().rposition(|step| step.name.ends_with(target))?;
    let ancestor = path.truncate(index + 1);

    let mut hasher = DefaultHasher::new();
    ancestor.hash(&mut hasher);
    Some(format!("{}_{}", steps[index].name, hasher.finish()))
}
