// ========================================================================================
//                             Model Feature Schemas
// ========================================================================================

// The four feature layouts the trained regressors expect. They are compiled-in
// constants; callers that need to drop a column take a copy via `working_schema`.

use crate::proxy::Target;

/// Columns of the full-social model. Shared by both targets; the requested
/// target is removed at expansion time, leaving 41 predictors.
pub const FULL_SOCIAL: &[&str] = &[
    "totalpopulation",
    "totalpop18plus",
    "access2_crudeprev",
    "arthritis_crudeprev",
    "binge_crudeprev",
    "bphigh_crudeprev",
    "bpmed_crudeprev",
    "cancer_crudeprev",
    "casthma_crudeprev",
    "chd_crudeprev",
    "checkup_crudeprev",
    "cholscreen_crudeprev",
    "colon_screen_crudeprev",
    "copd_crudeprev",
    "csmoking_crudeprev",
    "dental_crudeprev",
    "depression_crudeprev",
    "diabetes_crudeprev",
    "ghlth_crudeprev",
    "highchol_crudeprev",
    "lpa_crudeprev",
    "mammouse_crudeprev",
    "mhlth_crudeprev",
    "obesity_crudeprev",
    "phlth_crudeprev",
    "sleep_crudeprev",
    "stroke_crudeprev",
    "teethlost_crudeprev",
    "hearing_crudeprev",
    "vision_crudeprev",
    "cognition_crudeprev",
    "mobility_crudeprev",
    "selfcare_crudeprev",
    "indeplive_crudeprev",
    "disability_crudeprev",
    "isolation_crudeprev",
    "foodstamp_crudeprev",
    "foodinsecu_crudeprev",
    "housinsecu_crudeprev",
    "shututility_crudeprev",
    "lacktrpt_crudeprev",
    "emotionspt_crudeprev",
];

/// Columns of the no-social depression model. Keeps mhlth as a predictor.
pub const NO_SOCIAL_DEPRESSION: &[&str] = &[
    "totalpopulation",
    "totalpop18plus",
    "access2_crudeprev",
    "arthritis_crudeprev",
    "binge_crudeprev",
    "bphigh_crudeprev",
    "bpmed_crudeprev",
    "cancer_crudeprev",
    "casthma_crudeprev",
    "chd_crudeprev",
    "checkup_crudeprev",
    "cholscreen_crudeprev",
    "colon_screen_crudeprev",
    "copd_crudeprev",
    "csmoking_crudeprev",
    "dental_crudeprev",
    "diabetes_crudeprev",
    "ghlth_crudeprev",
    "highchol_crudeprev",
    "lpa_crudeprev",
    "mammouse_crudeprev",
    "mhlth_crudeprev",
    "obesity_crudeprev",
    "phlth_crudeprev",
    "sleep_crudeprev",
    "stroke_crudeprev",
    "teethlost_crudeprev",
    "hearing_crudeprev",
    "vision_crudeprev",
    "cognition_crudeprev",
    "mobility_crudeprev",
    "selfcare_crudeprev",
    "indeplive_crudeprev",
    "disability_crudeprev",
];

/// Columns of the no-social mhlth model. Keeps depression as a predictor.
pub const NO_SOCIAL_MHLTH: &[&str] = &[
    "totalpopulation",
    "totalpop18plus",
    "access2_crudeprev",
    "arthritis_crudeprev",
    "binge_crudeprev",
    "bphigh_crudeprev",
    "bpmed_crudeprev",
    "cancer_crudeprev",
    "casthma_crudeprev",
    "chd_crudeprev",
    "checkup_crudeprev",
    "cholscreen_crudeprev",
    "colon_screen_crudeprev",
    "copd_crudeprev",
    "csmoking_crudeprev",
    "dental_crudeprev",
    "depression_crudeprev",
    "diabetes_crudeprev",
    "ghlth_crudeprev",
    "highchol_crudeprev",
    "lpa_crudeprev",
    "mammouse_crudeprev",
    "obesity_crudeprev",
    "phlth_crudeprev",
    "sleep_crudeprev",
    "stroke_crudeprev",
    "teethlost_crudeprev",
    "hearing_crudeprev",
    "vision_crudeprev",
    "cognition_crudeprev",
    "mobility_crudeprev",
    "selfcare_crudeprev",
    "indeplive_crudeprev",
    "disability_crudeprev",
];

/// Social-determinant columns. Imputed by state median in the full-social
/// dataset and dropped entirely from the no-social one.
pub const SOCIAL_COLUMNS: &[&str] = &[
    "foodinsecu_crudeprev",
    "foodstamp_crudeprev",
    "housinsecu_crudeprev",
    "emotionspt_crudeprev",
    "isolation_crudeprev",
    "lacktrpt_crudeprev",
    "shututility_crudeprev",
];

/// Rows missing any of these are removed before modelling.
pub const CRITICAL_MEDICAL_COLUMNS: &[&str] = &[
    "highchol_crudeprev",
    "cholscreen_crudeprev",
    "bphigh_crudeprev",
    "bpmed_crudeprev",
];

/// Identifier and population columns carried through wrangling untouched.
pub const META_COLUMNS: &[&str] = &[
    "stateabbr",
    "statedesc",
    "countyname",
    "countyfips",
    "totalpopulation",
    "totalpop18plus",
];

/// Picks the schema for a request. Any target other than depression falls back
/// to the mhlth layout when social columns are off.
pub fn select_schema(use_social: bool, target: &str) -> &'static [&'static str] {
    if use_social {
        FULL_SOCIAL
    } else if target == Target::Depression.column() {
        NO_SOCIAL_DEPRESSION
    } else {
        NO_SOCIAL_MHLTH
    }
}

/// A private copy of the selected schema with the target column removed.
pub fn working_schema(use_social: bool, target: &str) -> Vec<&'static str> {
    select_schema(use_social, target)
        .iter()
        .copied()
        .filter(|&name| name != target)
        .collect()
}
