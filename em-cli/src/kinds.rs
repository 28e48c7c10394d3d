use em_core::prelude::*;
use em_engine::ComponentKind;

pub fn cmd() -> EmptyResult {
    for line in kind_lines() {
        println!("{line}");
    }
    Ok(())
}

fn kind_lines() -> Vec<String> {
    ComponentKind::ALL
        .iter()
        .map(|kind| format!("{:<22}{}", kind.as_str(), kind.aliases().join(", ")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_listed() {
        let lines = kind_lines();
        assert_eq!(lines.len(), ComponentKind::ALL.len());
        assert!(lines[0].starts_with("object-storage"));
        assert!(lines.iter().any(|l| l.contains("uipath")));
    }
}
