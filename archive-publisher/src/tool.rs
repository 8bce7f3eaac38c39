// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Running external programs. */

use {
    log::debug,
    std::{
        ffi::OsString,
        io::{BufRead, BufReader},
        path::Path,
    },
};

/// Run a program to completion, logging its combined output.
///
/// On failure the error holds the program's output, or the reason it could not be
/// started.
pub fn run_tool(program: &Path, args: Vec<OsString>) -> std::result::Result<(), String> {
    let name = program.display().to_string();
    debug!(
        "running {} {}",
        name,
        args.iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let command = duct::cmd(program, args)
        .stderr_to_stdout()
        .unchecked()
        .reader()
        .map_err(|e| format!("unable to start {}: {}", name, e))?;

    let mut output = vec![];
    {
        let reader = BufReader::new(&command);
        for line in reader.lines() {
            let line = line.map_err(|e| e.to_string())?;
            debug!("{}: {}", name, line);
            output.push(line);
        }
    }

    let status = command
        .try_wait()
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("unable to wait on {}", name))?;

    if status.status.success() {
        Ok(())
    } else {
        Err(if output.is_empty() {
            format!("{} exited with {}", name, status.status)
        } else {
            output.join("\n")
        })
    }
}
