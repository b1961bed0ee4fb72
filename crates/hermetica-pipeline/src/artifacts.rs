//! File names of the artifacts written under `<workdir>/<domain>/`.

pub const SUBDOMAINS_JSONL: &str = "subdomains.jsonl";
pub const SUBDOMAINS_TXT: &str = "subdomains.txt";
pub const RESOLVED_JSONL: &str = "resolved.jsonl";
pub const IPS_TXT: &str = "ips.txt";
pub const PORTS_JSONL: &str = "ports.jsonl";
pub const TARGETS_TXT: &str = "targets.txt";
pub const WEB_JSONL: &str = "web.jsonl";
pub const RUN_META_JSON: &str = "run.meta.json";
