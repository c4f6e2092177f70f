use super::decode::Candidate;

/// フレーム内の全候補に対する貪欲 NMS
///
/// クラスを区別しない（別クラスのボックスも抑制する）。
/// `score_threshold` 以下の候補を先に捨て、残りを confidence 降順で安定ソート
/// （同値は decode 順のまま）。採用したボックスと IoU が `nms_threshold` を
/// 超える候補を除外する。出力は採用順
pub fn suppress(candidates: &[Candidate], score_threshold: f32, nms_threshold: f32) -> Vec<Candidate> {
    let mut order: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].confidence > score_threshold)
        .collect();
    // sort_by は安定ソート
    order.sort_by(|&a, &b| candidates[b].confidence.total_cmp(&candidates[a].confidence));

    let mut kept: Vec<Candidate> = Vec::new();
    for idx in order {
        let candidate = &candidates[idx];
        let overlaps = kept
            .iter()
            .any(|k| k.bbox.iou(&candidate.bbox) > nms_threshold);
        if !overlaps {
            kept.push(*candidate);
        }
    }
    kept
}
