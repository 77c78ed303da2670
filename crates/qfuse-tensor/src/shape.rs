use core::fmt;

use serde::{Deserialize, Serialize};

/// Shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    /// The dimensions of the tensor.
    pub dims: Vec<usize>,
}

impl Shape {
    /// Constructs a new `Shape`.
    pub fn new<const D: usize>(dims: [usize; D]) -> Self {
        Self {
            dims: dims.to_vec(),
        }
    }

    /// Returns the total number of elements of a tensor having this shape
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the number of dimensions.
    pub fn num_dims(&self) -> usize {
        self.dims.len()
    }

    /// Row-major strides of a contiguous tensor with this shape.
    pub fn contiguous_strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.dims.len()];
        for i in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Number of elements a buffer must hold to be viewed with this shape and `strides`.
    pub fn required_len(&self, strides: &[usize]) -> usize {
        if self.dims.contains(&0) {
            return 0;
        }

        self.dims
            .iter()
            .zip(strides)
            .map(|(dim, stride)| (dim - 1) * stride)
            .sum::<usize>()
            + 1
    }

    /// Construct a vector of the dims.
    pub fn to_vec(&self) -> Vec<usize> {
        self.dims.clone()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

impl<const D: usize> From<[usize; D]> for Shape {
    fn from(dims: [usize; D]) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape { dims: dims.into() }
    }
}

impl From<Vec<usize>> for Shape {
    fn from(shape: Vec<usize>) -> Self {
        Self { dims: shape }
    }
}

impl From<&Vec<usize>> for Shape {
    fn from(shape: &Vec<usize>) -> Self {
        Self {
            dims: shape.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_elements() {
        let shape = Shape::new([2, 3, 4, 5]);
        assert_eq!(120, shape.num_elements());
    }

    #[test]
    fn contiguous_strides_are_row_major() {
        let shape = Shape::new([1, 3, 2, 2]);
        assert_eq!(shape.contiguous_strides(), vec![12, 4, 2, 1]);
        assert_eq!(Shape::new([]).contiguous_strides(), Vec::<usize>::new());
    }

    #[test]
    fn required_len_follows_strides() {
        let shape = Shape::new([2, 3]);
        assert_eq!(shape.required_len(&[3, 1]), 6);
        // Transposed view over a [3, 2] buffer.
        assert_eq!(shape.required_len(&[1, 2]), 6);
        assert_eq!(Shape::new([2, 0]).required_len(&[1, 1]), 0);
    }

    #[test]
    fn display() {
        assert_eq!(Shape::new([1, 2, 1, 1]).to_string(), "[1, 2, 1, 1]");
    }
}
