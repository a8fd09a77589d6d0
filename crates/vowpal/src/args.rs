use crate::VowpalError;

/// Assembles the argv handed to the `vw` binary.
///
/// Two flags are owned by the client and must not appear in the caller's
/// pass-through list: `-p` (the client decides where predictions are
/// streamed) and `-a` (audit mode changes the shape of the response stream
/// and is driven by the builder). In audit mode a caller-supplied `-t` is
/// dropped, since vw refuses to audit a test-only model.
pub(crate) fn build_argv(
    vw_args: &[String],
    audit_mode: bool,
    write_only: bool,
) -> Result<Vec<String>, VowpalError> {
    for arg in vw_args {
        if arg == "-p" || arg == "-a" {
            return Err(VowpalError::ReservedArg { arg: arg.clone() });
        }
    }

    let mut argv = vec![
        "-p".to_string(),
        if write_only { "/dev/null" } else { "/dev/stdout" }.to_string(),
    ];
    if audit_mode {
        argv.extend(vw_args.iter().filter(|arg| arg.as_str() != "-t").cloned());
        argv.push("-a".to_string());
    } else {
        argv.extend(vw_args.iter().cloned());
    }
    Ok(argv)
}
