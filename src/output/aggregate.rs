// 该文件是 Shanan Snap （山南快照） 项目的一部分。
// src/output/aggregate.rs - 检测结果统计
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use serde::Serialize;

use crate::model::Detection;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelSummary {
  /// 小写标签
  pub label: String,
  pub count: usize,
  /// 平均置信度百分比，保留一位小数
  pub avg_confidence: f64,
}

/// 按小写标签分组的统计，顺序为首次出现的顺序
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregatedCounts {
  pub labels: Vec<LabelSummary>,
  pub total_objects: usize,
}

impl AggregatedCounts {
  pub fn get(&self, label: &str) -> Option<&LabelSummary> {
    let label = label.to_lowercase();
    self.labels.iter().find(|s| s.label == label)
  }

  pub fn unique_labels(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.total_objects == 0
  }
}

pub fn aggregate(detections: &[Detection]) -> AggregatedCounts {
  // (label, count, score sum)
  let mut groups: Vec<(String, usize, f64)> = Vec::new();
  for detection in detections {
    let label = detection.label.to_lowercase();
    match groups.iter_mut().find(|(l, _, _)| *l == label) {
      Some((_, count, sum)) => {
        *count += 1;
        *sum += detection.score as f64;
      }
      None => groups.push((label, 1, detection.score as f64)),
    }
  }

  let labels = groups
    .into_iter()
    .map(|(label, count, sum)| LabelSummary {
      label,
      count,
      avg_confidence: round1(sum / count as f64 * 100.0),
    })
    .collect();

  AggregatedCounts {
    labels,
    total_objects: detections.len(),
  }
}

fn round1(value: f64) -> f64 {
  (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BoundingBox;

  fn det(label: &str, score: f32) -> Detection {
    Detection {
      label: label.to_string(),
      score,
      bbox: BoundingBox {
        xmin: 0.0,
        ymin: 0.0,
        xmax: 10.0,
        ymax: 10.0,
      },
    }
  }

  #[test]
  fn two_people_average_to_eighty() {
    let counts = aggregate(&[det("person", 0.9), det("person", 0.7)]);
    let person = counts.get("person").unwrap();
    assert_eq!(person.count, 2);
    assert_eq!(person.avg_confidence, 80.0);
    assert_eq!(counts.total_objects, 2);
    assert_eq!(counts.unique_labels(), 1);
  }

  #[test]
  fn labels_group_case_insensitively_in_first_seen_order() {
    let counts = aggregate(&[det("Dog", 0.5), det("person", 0.6), det("dog", 0.25)]);
    let labels: Vec<_> = counts.labels.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["dog", "person"]);
    assert_eq!(counts.get("DOG").unwrap().count, 2);
    assert_eq!(counts.get("dog").unwrap().avg_confidence, 37.5);
  }

  #[test]
  fn empty_list_has_no_groups() {
    let counts = aggregate(&[]);
    assert!(counts.is_empty());
    assert_eq!(counts.unique_labels(), 0);
  }

  #[test]
  fn totals_match_input_length() {
    let names = ["person", "Person", "cup", "bag", "BAG", "car", "dog"];
    for len in 0..40usize {
      let detections: Vec<_> = (0..len)
        .map(|i| det(names[(i * 5 + len) % names.len()], ((i * 37) % 100) as f32 / 100.0))
        .collect();
      let counts = aggregate(&detections);
      assert_eq!(counts.total_objects, detections.len());
      assert_eq!(
        counts.labels.iter().map(|s| s.count).sum::<usize>(),
        detections.len()
      );
    }
  }

  #[test]
  fn average_is_rounded_to_one_decimal() {
    let counts = aggregate(&[det("cup", 0.333), det("cup", 0.334), det("cup", 0.335)]);
    assert_eq!(counts.get("cup").unwrap().avg_confidence, 33.4);
  }
}
