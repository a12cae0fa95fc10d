//! Class/dn query options. The controller accepts a fixed set of query
//! parameters; this builder emits them in a stable order.

/// Optional query parameters for class and dn queries.
///
/// Recognized values follow the controller's API:
/// - query-target: children | subtree
/// - rsp-subtree: no | children | full
/// - rsp-prop-include: all | naming-only | config-explicit | config-all | oper
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilters {
    query_target: Option<String>,
    target_subtree_class: Option<String>,
    query_target_filter: Option<String>,
    rsp_subtree: Option<String>,
    rsp_subtree_include: Option<String>,
    rsp_prop_include: Option<String>,
    order_by: Option<String>,
}

impl QueryFilters {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn with_query_target(mut self, value: impl Into<String>) -> Self {
        self.query_target = Some(value.into());
        self
    }

    #[allow(dead_code)]
    pub fn with_target_subtree_class(mut self, value: impl Into<String>) -> Self {
        self.target_subtree_class = Some(value.into());
        self
    }

    pub fn with_query_target_filter(mut self, value: impl Into<String>) -> Self {
        self.query_target_filter = Some(value.into());
        self
    }

    pub fn with_rsp_subtree(mut self, value: impl Into<String>) -> Self {
        self.rsp_subtree = Some(value.into());
        self
    }

    #[allow(dead_code)]
    pub fn with_rsp_subtree_include(mut self, value: impl Into<String>) -> Self {
        self.rsp_subtree_include = Some(value.into());
        self
    }

    #[allow(dead_code)]
    pub fn with_rsp_prop_include(mut self, value: impl Into<String>) -> Self {
        self.rsp_prop_include = Some(value.into());
        self
    }

    #[allow(dead_code)]
    pub fn with_order_by(mut self, value: impl Into<String>) -> Self {
        self.order_by = Some(value.into());
        self
    }

    /// Render as a `?`-prefixed query string, or an empty string when no
    /// option is set.
    pub fn build(&self) -> String {
        let mut opts = String::new();
        let mut push = |name: &str, value: &Option<String>| {
            if let Some(value) = value {
                opts.push_str(&format!("&{}={}", name, value));
            }
        };
        push("query-target", &self.query_target);
        push("target-subtree-class", &self.target_subtree_class);
        push("query-target-filter", &self.query_target_filter);
        push("rsp-subtree", &self.rsp_subtree);
        push("rsp-subtree-include", &self.rsp_subtree_include);
        push("rsp-prop-include", &self.rsp_prop_include);
        push("order-by", &self.order_by);

        if opts.is_empty() {
            opts
        } else {
            format!("?{}", opts.trim_start_matches('&'))
        }
    }
}

/// Wildcard property filter, e.g. `wcard(fvCEp.ip,"10.0.0.0/24")`.
pub fn wcard(property: &str, value: &str) -> String {
    format!("wcard({},\"{}\")", property, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filters_build_nothing() {
        assert_eq!(QueryFilters::new().build(), "");
    }

    #[test]
    fn test_single_filter() {
        let opts = QueryFilters::new().with_rsp_subtree("children").build();
        assert_eq!(opts, "?rsp-subtree=children");
    }

    #[test]
    fn test_filters_keep_documented_order() {
        let opts = QueryFilters::new()
            .with_order_by("fvCEp.ip")
            .with_rsp_subtree("children")
            .with_query_target_filter(wcard("fvCEp.ip", "10.0.0.0/24"))
            .with_query_target("subtree")
            .build();
        assert_eq!(
            opts,
            "?query-target=subtree\
             &query-target-filter=wcard(fvCEp.ip,\"10.0.0.0/24\")\
             &rsp-subtree=children\
             &order-by=fvCEp.ip"
        );
    }

    #[test]
    fn test_wcard_keeps_literal_value() {
        assert_eq!(
            wcard("fvCEp.ip", "10.0.0.0/24"),
            "wcard(fvCEp.ip,\"10.0.0.0/24\")"
        );
    }
}
