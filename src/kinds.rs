//! Entity kind descriptors
//!
//! The same validate/filter/import/export machinery serves four entity kinds.
//! Instead of four near-identical services, everything kind-specific lives in
//! one static `KindDescriptor` per kind: table name, code prefix, the closed
//! identifier allow-lists the query compiler may interpolate, and the CSV
//! column contract for bulk exchange.
//!
//! Identifiers listed here are the only ones that ever reach SQL text; all
//! values go through bind parameters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four entity kinds served by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Process,
    RiskScenario,
    Asset,
    ThreatControl,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Process,
        EntityKind::RiskScenario,
        EntityKind::Asset,
        EntityKind::ThreatControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Process => "process",
            EntityKind::RiskScenario => "risk_scenario",
            EntityKind::Asset => "asset",
            EntityKind::ThreatControl => "threat_control",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" | "processes" => Ok(EntityKind::Process),
            "risk_scenario" | "risk_scenarios" => Ok(EntityKind::RiskScenario),
            "asset" | "assets" => Ok(EntityKind::Asset),
            "threat_control" | "threat_controls" => Ok(EntityKind::ThreatControl),
            other => Err(format!("unknown entity kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// How an import CSV cell is parsed into a column value
#[derive(Debug, Clone, Copy)]
pub enum CellParse {
    Text,
    Int,
    /// yes/true/1 and no/false/0, anything else becomes null
    Bool,
    /// Comma-separated tokens filtered against a closed allow-list
    Multi { allowed: &'static [&'static str] },
}

/// One column of the per-kind CSV import contract
#[derive(Debug, Clone, Copy)]
pub struct CsvColumn {
    /// Internal column name; also the insert target
    pub field: &'static str,
    /// Human-readable CSV header
    pub header: &'static str,
    pub parse: CellParse,
    /// Inline guidance text emitted in the template's sentinel row
    pub guidance: &'static str,
}

/// Value type of an exported column, used to decode the streamed rows
#[derive(Debug, Clone, Copy)]
pub enum ColumnType {
    Text,
    BigInt,
    Int,
    Bool,
    TextArray,
    Timestamp,
}

/// One column of the per-kind CSV export contract
#[derive(Debug, Clone, Copy)]
pub struct ExportColumn {
    /// SELECT expression, aliased as `alias` when it is not a plain column
    pub expr: &'static str,
    /// Result-set column name
    pub alias: &'static str,
    pub header: &'static str,
    pub ty: ColumnType,
}

/// Enrichment attribute attached to imported rows via the metadata catalog
#[derive(Debug, Clone, Copy)]
pub struct Enrichment {
    /// Metadata key name resolved once before streaming begins
    pub key: &'static str,
    /// CSV header carrying the comma-separated values
    pub header: &'static str,
}

/// Everything kind-specific the generic engine needs
#[derive(Debug, Clone, Copy)]
pub struct KindDescriptor {
    pub kind: EntityKind,
    pub table: &'static str,
    pub code_prefix: &'static str,
    /// Text columns the free-text search ORs over
    pub search_columns: &'static [&'static str],
    /// Columns accepted for sort_by; anything else falls back to the default
    pub sortable: &'static [&'static str],
    pub default_sort: (&'static str, SortDirection),
    /// Array-typed native facet columns (set-overlap semantics)
    pub array_facet_columns: &'static [&'static str],
    /// Scalar native facet columns (set-membership semantics)
    pub scalar_facet_columns: &'static [&'static str],
    /// Unique natural column used for import dedup and insert matching
    pub import_key: &'static str,
    pub csv_columns: &'static [CsvColumn],
    pub export_columns: &'static [ExportColumn],
    pub enrichment: Option<Enrichment>,
}

pub const DEPARTMENTS: &[&str] = &[
    "Engineering",
    "Finance",
    "HR",
    "IT",
    "Legal",
    "Operations",
    "Sales",
];

const COMMON_EXPORT_HEAD: [ExportColumn; 4] = [
    ExportColumn {
        expr: "id",
        alias: "id",
        header: "ID",
        ty: ColumnType::BigInt,
    },
    ExportColumn {
        expr: "code",
        alias: "code",
        header: "Code",
        ty: ColumnType::Text,
    },
    ExportColumn {
        expr: "name",
        alias: "name",
        header: "Name",
        ty: ColumnType::Text,
    },
    ExportColumn {
        expr: "description",
        alias: "description",
        header: "Description",
        ty: ColumnType::Text,
    },
];

const COMMON_EXPORT_TAIL: [ExportColumn; 3] = [
    ExportColumn {
        expr: "status",
        alias: "status",
        header: "Status",
        ty: ColumnType::Text,
    },
    ExportColumn {
        expr: "created_at",
        alias: "created_at",
        header: "Created At",
        ty: ColumnType::Timestamp,
    },
    ExportColumn {
        expr: "updated_at",
        alias: "updated_at",
        header: "Updated At",
        ty: ColumnType::Timestamp,
    },
];

macro_rules! export_columns {
    ($($col:expr),* $(,)?) => {
        &[
            COMMON_EXPORT_HEAD[0],
            COMMON_EXPORT_HEAD[1],
            COMMON_EXPORT_HEAD[2],
            COMMON_EXPORT_HEAD[3],
            $($col,)*
            COMMON_EXPORT_TAIL[0],
            COMMON_EXPORT_TAIL[1],
            COMMON_EXPORT_TAIL[2],
        ]
    };
}

static PROCESS: KindDescriptor = KindDescriptor {
    kind: EntityKind::Process,
    table: "processes",
    code_prefix: "PRO",
    search_columns: &["name", "description", "owner"],
    sortable: &["name", "code", "status", "criticality", "created_at", "updated_at"],
    default_sort: ("created_at", SortDirection::Desc),
    array_facet_columns: &["departments"],
    scalar_facet_columns: &["criticality"],
    import_key: "name",
    csv_columns: &[
        CsvColumn {
            field: "name",
            header: "Name",
            parse: CellParse::Text,
            guidance: "Required, must be unique",
        },
        CsvColumn {
            field: "description",
            header: "Description",
            parse: CellParse::Text,
            guidance: "Free text",
        },
        CsvColumn {
            field: "owner",
            header: "Owner",
            parse: CellParse::Text,
            guidance: "Responsible person or team",
        },
        CsvColumn {
            field: "criticality",
            header: "Criticality",
            parse: CellParse::Text,
            guidance: "e.g. low / medium / high",
        },
        CsvColumn {
            field: "departments",
            header: "Departments",
            parse: CellParse::Multi {
                allowed: DEPARTMENTS,
            },
            guidance: "Comma-separated, e.g. Engineering,Finance",
        },
    ],
    export_columns: export_columns![
        ExportColumn {
            expr: "owner",
            alias: "owner",
            header: "Owner",
            ty: ColumnType::Text,
        },
        ExportColumn {
            expr: "criticality",
            alias: "criticality",
            header: "Criticality",
            ty: ColumnType::Text,
        },
        ExportColumn {
            expr: "departments",
            alias: "departments",
            header: "Departments",
            ty: ColumnType::TextArray,
        },
    ],
    enrichment: Some(Enrichment {
        key: "industry",
        header: "Industry",
    }),
};

static RISK_SCENARIO: KindDescriptor = KindDescriptor {
    kind: EntityKind::RiskScenario,
    table: "risk_scenarios",
    code_prefix: "RSK",
    search_columns: &["name", "description"],
    sortable: &["name", "code", "status", "category", "likelihood", "impact", "created_at", "updated_at"],
    default_sort: ("created_at", SortDirection::Desc),
    array_facet_columns: &[],
    scalar_facet_columns: &["category"],
    import_key: "name",
    csv_columns: &[
        CsvColumn {
            field: "name",
            header: "Name",
            parse: CellParse::Text,
            guidance: "Required, must be unique",
        },
        CsvColumn {
            field: "description",
            header: "Description",
            parse: CellParse::Text,
            guidance: "Free text",
        },
        CsvColumn {
            field: "category",
            header: "Category",
            parse: CellParse::Text,
            guidance: "Risk category label",
        },
        CsvColumn {
            field: "likelihood",
            header: "Likelihood",
            parse: CellParse::Int,
            guidance: "1-5",
        },
        CsvColumn {
            field: "impact",
            header: "Impact",
            parse: CellParse::Int,
            guidance: "1-5",
        },
    ],
    export_columns: export_columns![
        ExportColumn {
            expr: "category",
            alias: "category",
            header: "Category",
            ty: ColumnType::Text,
        },
        ExportColumn {
            expr: "likelihood",
            alias: "likelihood",
            header: "Likelihood",
            ty: ColumnType::Int,
        },
        ExportColumn {
            expr: "impact",
            alias: "impact",
            header: "Impact",
            ty: ColumnType::Int,
        },
        ExportColumn {
            expr: "likelihood * impact",
            alias: "risk_level",
            header: "Risk Level",
            ty: ColumnType::Int,
        },
    ],
    enrichment: Some(Enrichment {
        key: "industry",
        header: "Industry",
    }),
};

static ASSET: KindDescriptor = KindDescriptor {
    kind: EntityKind::Asset,
    table: "assets",
    code_prefix: "AST",
    search_columns: &["name", "description", "location"],
    sortable: &["name", "code", "status", "asset_type", "location", "created_at", "updated_at"],
    default_sort: ("created_at", SortDirection::Desc),
    array_facet_columns: &[],
    scalar_facet_columns: &["asset_type", "location"],
    import_key: "name",
    csv_columns: &[
        CsvColumn {
            field: "name",
            header: "Name",
            parse: CellParse::Text,
            guidance: "Required, must be unique",
        },
        CsvColumn {
            field: "description",
            header: "Description",
            parse: CellParse::Text,
            guidance: "Free text",
        },
        CsvColumn {
            field: "asset_type",
            header: "Asset Type",
            parse: CellParse::Text,
            guidance: "e.g. server / application / facility",
        },
        CsvColumn {
            field: "location",
            header: "Location",
            parse: CellParse::Text,
            guidance: "Site or region",
        },
        CsvColumn {
            field: "critical",
            header: "Critical",
            parse: CellParse::Bool,
            guidance: "yes/no",
        },
    ],
    export_columns: export_columns![
        ExportColumn {
            expr: "asset_type",
            alias: "asset_type",
            header: "Asset Type",
            ty: ColumnType::Text,
        },
        ExportColumn {
            expr: "location",
            alias: "location",
            header: "Location",
            ty: ColumnType::Text,
        },
        ExportColumn {
            expr: "critical",
            alias: "critical",
            header: "Critical",
            ty: ColumnType::Bool,
        },
    ],
    enrichment: Some(Enrichment {
        key: "industry",
        header: "Industry",
    }),
};

static THREAT_CONTROL: KindDescriptor = KindDescriptor {
    kind: EntityKind::ThreatControl,
    table: "threat_controls",
    code_prefix: "CTL",
    search_columns: &["name", "description"],
    sortable: &["name", "code", "status", "control_family", "created_at", "updated_at"],
    default_sort: ("created_at", SortDirection::Desc),
    array_facet_columns: &[],
    scalar_facet_columns: &["control_family"],
    import_key: "name",
    csv_columns: &[
        CsvColumn {
            field: "name",
            header: "Name",
            parse: CellParse::Text,
            guidance: "Required, must be unique",
        },
        CsvColumn {
            field: "description",
            header: "Description",
            parse: CellParse::Text,
            guidance: "Free text",
        },
        CsvColumn {
            field: "control_family",
            header: "Control Family",
            parse: CellParse::Text,
            guidance: "e.g. access-control / logging",
        },
        CsvColumn {
            field: "implemented",
            header: "Implemented",
            parse: CellParse::Bool,
            guidance: "yes/no",
        },
        CsvColumn {
            field: "reference_id",
            header: "Reference",
            parse: CellParse::Text,
            guidance: "External framework reference",
        },
    ],
    export_columns: export_columns![
        ExportColumn {
            expr: "control_family",
            alias: "control_family",
            header: "Control Family",
            ty: ColumnType::Text,
        },
        ExportColumn {
            expr: "implemented",
            alias: "implemented",
            header: "Implemented",
            ty: ColumnType::Bool,
        },
        ExportColumn {
            expr: "reference_id",
            alias: "reference_id",
            header: "Reference",
            ty: ColumnType::Text,
        },
    ],
    enrichment: Some(Enrichment {
        key: "industry",
        header: "Industry",
    }),
};

/// Look up the static descriptor for an entity kind
pub fn descriptor(kind: EntityKind) -> &'static KindDescriptor {
    match kind {
        EntityKind::Process => &PROCESS,
        EntityKind::RiskScenario => &RISK_SCENARIO,
        EntityKind::Asset => &ASSET,
        EntityKind::ThreatControl => &THREAT_CONTROL,
    }
}

impl KindDescriptor {
    /// Match a facet key against this kind's native columns. Returns the
    /// canonical column name from the allow-list, never the caller's string,
    /// so it is safe to interpolate.
    pub fn native_facet(&self, name: &str) -> Option<(&'static str, NativeFacetKind)> {
        if let Some(column) = self.array_facet_columns.iter().find(|c| **c == name) {
            Some((column, NativeFacetKind::Array))
        } else if let Some(column) = self.scalar_facet_columns.iter().find(|c| **c == name) {
            Some((column, NativeFacetKind::Scalar))
        } else {
            None
        }
    }

    /// Validate a requested sort against the allow-list, falling back to the
    /// kind default. Permissive on purpose: an unknown sort column is not an
    /// error.
    pub fn resolve_sort(
        &self,
        sort_by: Option<&str>,
        sort_dir: Option<SortDirection>,
    ) -> (&'static str, SortDirection) {
        let column = sort_by
            .and_then(|s| self.sortable.iter().find(|c| **c == s))
            .copied()
            .unwrap_or(self.default_sort.0);
        let dir = sort_dir.unwrap_or(self.default_sort.1);
        (column, dir)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFacetKind {
    Array,
    Scalar,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_descriptor_identifier_hygiene() {
        // Everything the compiler may interpolate must be a plain identifier.
        let ident_ok = |s: &str| {
            !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c == '_')
        };
        for kind in EntityKind::ALL {
            let desc = descriptor(kind);
            assert!(ident_ok(desc.table));
            assert!(ident_ok(desc.import_key));
            for col in desc
                .search_columns
                .iter()
                .chain(desc.sortable)
                .chain(desc.array_facet_columns)
                .chain(desc.scalar_facet_columns)
            {
                assert!(ident_ok(col), "bad identifier {col}");
            }
        }
    }

    #[test]
    fn test_sort_fallback_is_silent() {
        let desc = descriptor(EntityKind::Process);
        let (col, dir) = desc.resolve_sort(Some("robert'); DROP TABLE processes;--"), None);
        assert_eq!(col, "created_at");
        assert_eq!(dir, SortDirection::Desc);

        let (col, dir) = desc.resolve_sort(Some("name"), Some(SortDirection::Asc));
        assert_eq!(col, "name");
        assert_eq!(dir, SortDirection::Asc);
    }

    #[test]
    fn test_native_facet_partition() {
        let desc = descriptor(EntityKind::Process);
        assert_eq!(
            desc.native_facet("departments"),
            Some(("departments", NativeFacetKind::Array))
        );
        assert_eq!(
            desc.native_facet("criticality"),
            Some(("criticality", NativeFacetKind::Scalar))
        );
        assert_eq!(desc.native_facet("industry"), None);
    }

    #[test]
    fn test_export_contract_covers_core_fields() {
        for kind in EntityKind::ALL {
            let cols = descriptor(kind).export_columns;
            assert_eq!(cols[0].alias, "id");
            assert_eq!(cols[1].alias, "code");
            assert_eq!(cols.last().unwrap().alias, "updated_at");
        }
    }
}
