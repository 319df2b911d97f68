// Dotlock
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use anyhow::Result;
use dotlock_core::deadlock::scenarios;

/// Print the scenario catalog in declaration order
pub fn run(json: bool) -> Result<()> {
    let catalog = scenarios();

    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    for scenario in &catalog {
        let label = if scenario.deadlocked { "deadlock" } else { "safe" };
        println!("{:<26} [{label:>8}]  {}", scenario.name, scenario.summary);
    }
    Ok(())
}
