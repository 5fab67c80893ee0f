use std::{fmt, str::FromStr};

/// Number of `:` separated fields in a CPE 2.3 formatted string.
const FIELDS: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    Any,
    Application,
    OperatingSystem,
    Hardware,
}

impl FromStr for Part {
    type Err = String;

    fn from_str(val: &str) -> Result<Self, Self::Err> {
        match val {
            "*" => Ok(Self::Any),
            "a" => Ok(Self::Application),
            "o" => Ok(Self::OperatingSystem),
            "h" => Ok(Self::Hardware),
            _ => Err(format!("could not convert '{}' to a platform part", val)),
        }
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Application => write!(f, "a"),
            Self::OperatingSystem => write!(f, "o"),
            Self::Hardware => write!(f, "h"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Component {
    #[default]
    Any,
    NotApplicable,
    Value(String),
}

impl FromStr for Component {
    type Err = String;

    fn from_str(val: &str) -> Result<Self, Self::Err> {
        Ok(match val {
            "" => return Err("empty component".to_string()),
            "*" => Component::Any,
            "-" => Component::NotApplicable,
            _ => Component::Value(val.to_owned()),
        })
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Component::Any => write!(f, "*"),
            Component::NotApplicable => write!(f, "-"),
            Component::Value(v) => write!(f, "{}", v),
        }
    }
}

/// A platform identifier in CPE 2.3 formatted-string form, the value the
/// advisory source filters on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub part: Part,
    pub vendor: Component,
    pub product: Component,
    /// version, update, edition, language, sw_edition, target_sw,
    /// target_hw, other
    pub qualifiers: [Component; 8],
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(val: &str) -> Result<Self, Self::Err> {
        let fields = val.split(':').collect::<Vec<_>>();
        if fields.len() != FIELDS {
            return Err(format!(
                "expected {} fields in platform identifier, found {}",
                FIELDS,
                fields.len()
            ));
        }

        if !fields[0].eq_ignore_ascii_case("cpe") {
            return Err(format!("expected 'cpe' found '{}'", fields[0]));
        } else if fields[1] != "2.3" {
            return Err(format!("expected cpe v2.3, found v{}", fields[1]));
        }

        let part = fields[2].parse::<Part>()?;
        let vendor = fields[3].parse::<Component>()?;
        let product = fields[4].parse::<Component>()?;

        let mut qualifiers: [Component; 8] = Default::default();
        for (slot, raw) in qualifiers.iter_mut().zip(&fields[5..]) {
            *slot = raw.parse::<Component>()?;
        }

        Ok(Self {
            part,
            vendor,
            product,
            qualifiers,
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cpe:2.3:{}:{}:{}", self.part, self.vendor, self.product)?;
        for qualifier in &self.qualifiers {
            write!(f, ":{}", qualifier)?;
        }
        Ok(())
    }
}
