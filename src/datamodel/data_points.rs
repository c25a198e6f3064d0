use super::data_point::DataPoint;

/// A batch of points delivered to a sink in a single call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataPoints {
    points: Vec<DataPoint>,
}

impl DataPoints {
    pub fn new(points: Vec<DataPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DataPoint> {
        self.points.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DataPoint> {
        self.points.iter()
    }
}

impl From<Vec<DataPoint>> for DataPoints {
    fn from(points: Vec<DataPoint>) -> Self {
        Self::new(points)
    }
}

impl IntoIterator for DataPoints {
    type Item = DataPoint;
    type IntoIter = std::vec::IntoIter<DataPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

impl<'a> IntoIterator for &'a DataPoints {
    type Item = &'a DataPoint;
    type IntoIter = std::slice::Iter<'a, DataPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
