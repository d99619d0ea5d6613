use std::path::Path;

use json::JsonValue;

use crate::{
    datatypes::{LoadRule, ModelMetadata, ProblemKind, SolverMethod, SolverSettings},
    error::{FeldsparError, Result},
};

/// Parses the input json into a JsonValue object
///
/// # Arguments
/// * `input_file` - The path to the input file
///
/// # Returns
/// A JsonValue object
pub fn load_input_file(input_file: &Path) -> Result<JsonValue> {
    let file_string = std::fs::read_to_string(input_file).map_err(|err| {
        FeldsparError::Input(format!(
            "Unable to open input file {}: {err}",
            input_file.display()
        ))
    })?;

    parse_input_json(&file_string)
}

/// Parses and validates the top-level layout of an input document
pub fn parse_input_json(contents: &str) -> Result<JsonValue> {
    let input_file_json = json::parse(contents)
        .map_err(|err| FeldsparError::Input(format!("Error in input file json: {err}")))?;

    if !input_file_json.has_key("metadata") {
        return Err(FeldsparError::Input(
            "Input json missing metadata field".to_string(),
        ));
    }
    if !input_file_json["metadata"].has_key("youngs_modulus") {
        return Err(FeldsparError::Input(
            "Input json missing youngs_modulus field in metadata section".to_string(),
        ));
    }
    if !input_file_json["metadata"].has_key("poisson_ratio") {
        return Err(FeldsparError::Input(
            "Input json missing poisson_ratio field in metadata section".to_string(),
        ));
    }

    Ok(input_file_json)
}

fn required_f64(value: &JsonValue, name: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| FeldsparError::Input(format!("Bad value for {name}: expected a number")))
}

/// Reads an optional numeric field, falling back to `default` when absent
fn optional_f64(section: &JsonValue, key: &str, default: f64) -> Result<f64> {
    if section.has_key(key) {
        required_f64(&section[key], key)
    } else {
        Ok(default)
    }
}

fn parse_problem(problem_json: &JsonValue) -> Result<ProblemKind> {
    let kind = problem_json["kind"]
        .as_str()
        .ok_or_else(|| FeldsparError::Input("Problem section missing kind field".to_owned()))?;

    match kind {
        "uniform_load" => {
            let mut force = [-3e7, 0.0];
            if problem_json.has_key("force") {
                let force_json = &problem_json["force"];
                if !force_json.is_array() || force_json.len() != 2 {
                    return Err(FeldsparError::Input(
                        "Bad value for force: expected [fx, fy]".to_owned(),
                    ));
                }
                force = [
                    required_f64(&force_json[0], "force")?,
                    required_f64(&force_json[1], "force")?,
                ];
            }
            Ok(ProblemKind::UniformLoad { force })
        }
        "sine_bubble" => Ok(ProblemKind::SineBubble),
        other => Err(FeldsparError::Input(format!(
            "Unknown problem kind '{other}'. Expected uniform_load or sine_bubble"
        ))),
    }
}

fn parse_load_rule(value: &JsonValue) -> Result<LoadRule> {
    match value.as_str() {
        Some("linear") => Ok(LoadRule::Linear),
        Some("centroid") => Ok(LoadRule::Centroid),
        _ => Err(FeldsparError::Input(format!(
            "Unknown load_rule {value}. Expected linear or centroid"
        ))),
    }
}

fn parse_solver(solver_json: &JsonValue) -> Result<SolverSettings> {
    let defaults = SolverSettings::default();

    let method = if solver_json.has_key("method") {
        match solver_json["method"].as_str() {
            Some("cg") => SolverMethod::ConjugateGradient,
            Some("cholesky") => SolverMethod::Cholesky,
            _ => {
                return Err(FeldsparError::Input(format!(
                    "Unknown solver method {}. Expected cg or cholesky",
                    solver_json["method"]
                )))
            }
        }
    } else {
        defaults.method
    };

    let relative_tolerance =
        optional_f64(solver_json, "relative_tolerance", defaults.relative_tolerance)?;
    let absolute_tolerance =
        optional_f64(solver_json, "absolute_tolerance", defaults.absolute_tolerance)?;

    let max_iterations = if solver_json.has_key("max_iterations") {
        solver_json["max_iterations"].as_u64().ok_or_else(|| {
            FeldsparError::Input("Bad value for max_iterations: expected an integer".to_owned())
        })?
    } else {
        defaults.max_iterations
    };

    if !(relative_tolerance >= 0.0) || !(absolute_tolerance >= 0.0) {
        return Err(FeldsparError::Input(
            "Solver tolerances must be non-negative".to_owned(),
        ));
    }

    Ok(SolverSettings {
        method,
        relative_tolerance,
        absolute_tolerance,
        max_iterations,
    })
}

/// Parses Model Metadata from the input_json
///
/// # Arguments
/// * `input_json`: The input file as a JsonValue object
///
/// # Returns
/// A ModelMetadata instance
pub fn parse_input_metadata(input_json: &JsonValue) -> Result<ModelMetadata> {
    let defaults = ModelMetadata::default();

    let youngs_modulus = required_f64(&input_json["metadata"]["youngs_modulus"], "youngs_modulus")?;
    let poisson_ratio = required_f64(&input_json["metadata"]["poisson_ratio"], "poisson_ratio")?;

    let problem = if input_json.has_key("problem") {
        parse_problem(&input_json["problem"])?
    } else {
        defaults.problem
    };

    let load_rule = if input_json.has_key("load_rule") {
        parse_load_rule(&input_json["load_rule"])?
    } else {
        defaults.load_rule
    };

    let solver = if input_json.has_key("solver") {
        parse_solver(&input_json["solver"])?
    } else {
        defaults.solver
    };

    let unit_square_divisions = if input_json["mesh"].has_key("unit_square") {
        match input_json["mesh"]["unit_square"].as_usize() {
            Some(n) if n > 0 => Some(n),
            _ => {
                return Err(FeldsparError::Input(
                    "Bad value for unit_square: expected a positive integer".to_owned(),
                ))
            }
        }
    } else {
        None
    };

    Ok(ModelMetadata {
        youngs_modulus,
        poisson_ratio,
        problem,
        load_rule,
        solver,
        unit_square_divisions,
    })
}

/// Loads and parses an input file
pub fn run(input_file: &Path) -> Result<ModelMetadata> {
    let input_json = load_input_file(input_file)?;
    parse_input_metadata(&input_json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn parse(contents: &str) -> Result<ModelMetadata> {
        parse_input_metadata(&parse_input_json(contents)?)
    }

    #[test]
    fn minimal_input_uses_defaults() {
        let meta = parse(r#"{"metadata": {"youngs_modulus": 3.5e6, "poisson_ratio": 0.3}}"#)
            .unwrap();

        assert_relative_eq!(meta.youngs_modulus, 3.5e6);
        assert_relative_eq!(meta.poisson_ratio, 0.3);
        assert_eq!(meta.problem, ProblemKind::UniformLoad { force: [-3e7, 0.0] });
        assert_eq!(meta.load_rule, LoadRule::Linear);
        assert_eq!(meta.solver, SolverSettings::default());
        assert_eq!(meta.unit_square_divisions, None);
    }

    #[test]
    fn full_input_is_parsed() {
        let meta = parse(
            r#"{
                "metadata": {"youngs_modulus": 200e9, "poisson_ratio": 0.25},
                "problem": {"kind": "sine_bubble"},
                "load_rule": "centroid",
                "solver": {
                    "method": "cholesky",
                    "relative_tolerance": 1e-8,
                    "max_iterations": 50
                },
                "mesh": {"unit_square": 8}
            }"#,
        )
        .unwrap();

        assert_eq!(meta.problem, ProblemKind::SineBubble);
        assert_eq!(meta.load_rule, LoadRule::Centroid);
        assert_eq!(meta.solver.method, SolverMethod::Cholesky);
        assert_relative_eq!(meta.solver.relative_tolerance, 1e-8);
        assert_relative_eq!(meta.solver.absolute_tolerance, 1e-15);
        assert_eq!(meta.solver.max_iterations, 50);
        assert_eq!(meta.unit_square_divisions, Some(8));
    }

    #[test]
    fn uniform_load_force_is_read() {
        let meta = parse(
            r#"{
                "metadata": {"youngs_modulus": 1.0, "poisson_ratio": 0.2},
                "problem": {"kind": "uniform_load", "force": [1.5, -2.0]}
            }"#,
        )
        .unwrap();
        assert_eq!(meta.problem, ProblemKind::UniformLoad { force: [1.5, -2.0] });
    }

    #[test]
    fn missing_material_is_rejected() {
        let err = parse(r#"{"metadata": {"youngs_modulus": 1.0}}"#).unwrap_err();
        assert!(matches!(err, FeldsparError::Input(_)));
        assert!(parse(r#"{"problem": {"kind": "sine_bubble"}}"#).is_err());
    }

    #[test]
    fn unknown_options_are_rejected() {
        let base = r#""metadata": {"youngs_modulus": 1.0, "poisson_ratio": 0.2}"#;
        assert!(parse(&format!(r#"{{{base}, "problem": {{"kind": "torsion"}}}}"#)).is_err());
        assert!(parse(&format!(r#"{{{base}, "load_rule": "gauss"}}"#)).is_err());
        assert!(parse(&format!(r#"{{{base}, "solver": {{"method": "lu"}}}}"#)).is_err());
        assert!(parse(&format!(r#"{{{base}, "mesh": {{"unit_square": 0}}}}"#)).is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(parse("{"), Err(FeldsparError::Input(_))));
    }
}
