use crate::domain::model::{InstalledTool, ToolVersion};

/// Parses the table printed by `dotnet tool list -g`:
///
/// ```text
/// Package Id      Version      Commands
/// -------------------------------------
/// nanoclr         1.2.7        nanoclr
/// ```
pub fn parse_tool_list(output: &str) -> Vec<InstalledTool> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .skip_while(|line| !line.starts_with("---"))
        .skip(1)
        .filter_map(parse_row)
        .collect()
}

fn parse_row(line: &str) -> Option<InstalledTool> {
    let mut columns = line.split_whitespace();
    let package_id = columns.next()?;
    let raw_version = columns.next()?;

    let version = match raw_version.parse::<ToolVersion>() {
        Ok(version) => version,
        Err(e) => {
            tracing::debug!("Skipping tool list row '{}': {}", line, e);
            return None;
        }
    };

    Some(InstalledTool {
        package_id: package_id.to_string(),
        version,
        commands: columns.map(str::to_string).collect(),
    })
}

pub fn find_tool<'a>(tools: &'a [InstalledTool], package_id: &str) -> Option<&'a InstalledTool> {
    tools
        .iter()
        .find(|tool| tool.package_id.eq_ignore_ascii_case(package_id))
}
