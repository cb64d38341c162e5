use crate::geometry::DimensionKey;
use serde::{Deserialize, Serialize};

/// Two dimensions joined by portals. Horizontal coordinates are multiplied by `scale`
/// travelling `from -> to` and divided by it on the way back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionRoute {
    pub from: DimensionKey,
    pub to: DimensionKey,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DimensionRoutes {
    routes: Vec<DimensionRoute>,
}

impl DimensionRoutes {
    pub fn new(routes: Vec<DimensionRoute>) -> Self {
        let routes = routes
            .into_iter()
            .filter(|route| {
                let usable = route.from != route.to && route.scale.is_finite() && route.scale > 0.0;
                if !usable {
                    log::warn!(
                        "[portal-routes] ignoring route {} -> {} (scale {})",
                        route.from,
                        route.to,
                        route.scale
                    );
                }
                usable
            })
            .collect();
        Self { routes }
    }

    pub fn single(from: impl Into<DimensionKey>, to: impl Into<DimensionKey>, scale: f64) -> Self {
        Self::new(vec![DimensionRoute {
            from: from.into(),
            to: to.into(),
            scale,
        }])
    }

    /// Destination dimension and coordinate scale for a portal built in `dimension`.
    /// The first matching route wins.
    pub fn resolve(&self, dimension: &DimensionKey) -> Option<(DimensionKey, f64)> {
        self.routes.iter().find_map(|route| {
            if &route.from == dimension {
                Some((route.to.clone(), route.scale))
            } else if &route.to == dimension {
                Some((route.from.clone(), 1.0 / route.scale))
            } else {
                None
            }
        })
    }

    pub fn routes(&self) -> &[DimensionRoute] {
        &self.routes
    }
}
