// PromQL for kubelet volume stats of a set of claims.
use super::query_client::{escape_label_value, name_alternation};

pub const CLAIM_LABEL: &str = "persistentvolumeclaim";

const USED_BYTES: &str = "kubelet_volume_stats_used_bytes";
const INODES_USED: &str = "kubelet_volume_stats_inodes_used";
const INODES: &str = "kubelet_volume_stats_inodes";

fn selector(namespace: &str, names: &[&str]) -> String {
    let claim = match names {
        [single] => format!(r#"{}="{}""#, CLAIM_LABEL, escape_label_value(single)),
        many => format!(
            r#"{}=~"{}""#,
            CLAIM_LABEL,
            escape_label_value(&name_alternation(many))
        ),
    };
    format!(r#"{{namespace="{}",{}}}"#, escape_label_value(namespace), claim)
}

/// Used bytes per claim.
pub fn usage_query(namespace: &str, names: &[&str]) -> String {
    format!("{}{}", USED_BYTES, selector(namespace, names))
}

/// Inode usage in percent per claim.
pub fn inode_percent_query(namespace: &str, names: &[&str]) -> String {
    let sel = selector(namespace, names);
    format!("100 * {}{} / {}{}", INODES_USED, sel, INODES, sel)
}
