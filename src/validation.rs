//! GLSL pre-flight validation using the naga library.
//!
//! The backend owns real compilation; this module gives hosts a way to
//! parse a fragment before handing it to the facade, and the error-log
//! remapping that folds the synthesized prelude out of reported line
//! numbers.

use anyhow::{Context, Result, anyhow};

#[derive(Debug, Clone, Copy)]
pub enum GlslShaderStage {
    Vertex,
    Fragment,
}

/// Parse and validate GLSL source with naga's GLSL frontend.
///
/// Returns the parsed naga Module on success, or an error with detailed
/// information on failure.
pub fn validate_glsl(source: &str, stage: GlslShaderStage) -> Result<naga::Module> {
    let shader_stage = match stage {
        GlslShaderStage::Vertex => naga::ShaderStage::Vertex,
        GlslShaderStage::Fragment => naga::ShaderStage::Fragment,
    };

    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options {
        stage: shader_stage,
        defines: Default::default(),
    };

    let module = frontend
        .parse(&options, source)
        .map_err(|e| anyhow!("GLSL parse failed: {e:?}"))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("GLSL validation failed: {e:?}"))?;

    Ok(module)
}

/// Validate GLSL and say which pass generated it.
pub fn validate_glsl_with_context(
    source: &str,
    stage: GlslShaderStage,
    context: &str,
) -> Result<naga::Module> {
    validate_glsl(source, stage).with_context(|| format!("{context} generated invalid GLSL"))
}

/// Shift GL-style `0:<line>:` references in a compile log past the
/// synthesized prelude, so errors point at user-authored lines. Lines that
/// fall inside the prelude clamp to 1.
pub fn remap_error_log(log: &str, offset: u32) -> String {
    let mut out = String::with_capacity(log.len());
    let mut rest = log;
    while let Some(pos) = rest.find("0:") {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        let after = &tail[2..];
        let digit_count = after.chars().take_while(|c| c.is_ascii_digit()).count();
        let after_digits = &after[digit_count..];
        if digit_count > 0 && after_digits.starts_with(':') {
            let line: u32 = after[..digit_count].parse().unwrap_or(0);
            let remapped = line.saturating_sub(offset).max(1);
            out.push_str("0:");
            out.push_str(&remapped.to_string());
            rest = after_digits;
        } else {
            out.push_str("0:");
            rest = after;
        }
    }
    out.push_str(rest);
    out
}
