use super::error::FilterError;
use super::types::{FilterOrderInfo, SortDirection};
use crate::schema::EntitySpec;

pub struct FilterOrder;

impl FilterOrder {
    /// Parses `"last_name desc, id"` into sort keys, rejecting undeclared columns.
    pub fn parse(spec: &EntitySpec, order: &str) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let mut out = Vec::new();
        for part in order.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            let mut it = trimmed.split_whitespace();
            let Some(col) = it.next() else { continue };
            let sort = match it.next() {
                None => SortDirection::Asc,
                Some(dir) if dir.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                Some(dir) if dir.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                Some(dir) => return Err(FilterError::InvalidColumn(format!("{} {}", col, dir))),
            };
            let column = Self::resolve_column(spec, col)?;
            out.push(FilterOrderInfo { column, sort });
        }
        Ok(out)
    }

    /// Declared default ordering of an entity.
    pub fn defaults(spec: &EntitySpec) -> Vec<FilterOrderInfo> {
        spec.order
            .iter()
            .map(|(column, sort)| FilterOrderInfo { column: *column, sort: *sort })
            .collect()
    }

    pub fn generate(alias: &str, infos: &[FilterOrderInfo]) -> String {
        if infos.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = infos
            .iter()
            .map(|i| format!("{}.\"{}\" {}", alias, i.column, i.sort.to_sql()))
            .collect();
        format!("ORDER BY {}", parts.join(", "))
    }

    fn resolve_column(spec: &EntitySpec, name: &str) -> Result<&'static str, FilterError> {
        if name == "id" && spec.has_surrogate_key() {
            return Ok("id");
        }
        spec.field(name)
            .filter(|f| !f.hidden)
            .map(|f| f.name)
            .ok_or_else(|| FilterError::InvalidColumn(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityKind;

    #[test]
    fn test_parse_order_string() {
        let spec = EntityKind::Tutor.spec();
        let infos = FilterOrder::parse(spec, "last_name desc, id").unwrap();
        assert_eq!(
            infos,
            vec![
                FilterOrderInfo { column: "last_name", sort: SortDirection::Desc },
                FilterOrderInfo { column: "id", sort: SortDirection::Asc },
            ]
        );
    }

    #[test]
    fn test_parse_rejects_unknown_column() {
        let spec = EntityKind::Tutor.spec();
        assert_eq!(
            FilterOrder::parse(spec, "salary").unwrap_err(),
            FilterError::InvalidColumn("salary".to_string())
        );
        assert!(FilterOrder::parse(spec, "email sideways").is_err());
        assert!(FilterOrder::parse(EntityKind::User.spec(), "password_hash").is_err());
    }

    #[test]
    fn test_generate() {
        let infos = FilterOrder::defaults(EntityKind::Payment.spec());
        assert_eq!(FilterOrder::generate("t", &infos), "ORDER BY t.\"paid_at\" DESC, t.\"id\" DESC");
        assert_eq!(FilterOrder::generate("t", &[]), "");
    }
}
